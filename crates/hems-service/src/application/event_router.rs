//! Entry point for events coming from the protocol engine.
//!
//! The engine calls [`EventRouter::dispatch`] for every capability event and
//! [`EventRouter::session_event`] for session lifecycle changes, from any
//! thread and with no ordering guarantees across peers.
//!
//! # Capability event pipeline
//!
//! ```text
//! 1. resolve peer      registry.get_or_create(ski)
//! 2. apply event       support flip  |  value reads (per field)
//! 3. topology          re-render from the payload, cache on the record
//! 4. publish           one publish_all() with everything collected
//! ```
//!
//! Step 3 runs for every event regardless of what step 2 did.  A field that
//! cannot be read keeps its previous value; the failure is logged at debug
//! level and the rest of the event proceeds.

use std::sync::Arc;

use hems_core::{
    CapabilityEvent, EventPayload, ObserverMessage, PeerId, SessionEvent, Severity,
    TopologySnapshot,
};
use tracing::{debug, info};

use super::broadcaster::Broadcaster;
use super::peer_registry::lock_record;

/// Routes engine events into registry updates and observer messages.
#[derive(Debug, Clone)]
pub struct EventRouter {
    broadcaster: Arc<Broadcaster>,
}

impl EventRouter {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Handles one capability event for `usecase` on peer `ski`.
    ///
    /// Returns the number of messages published for it.
    pub fn dispatch(
        &self,
        ski: &PeerId,
        usecase: &str,
        event: &CapabilityEvent,
        payload: &dyn EventPayload,
    ) -> usize {
        let handle = self.broadcaster.registry().get_or_create(ski);
        let mut msgs = Vec::new();

        match event {
            CapabilityEvent::SupportUpdate => {
                let changed = lock_record(&handle).set_support(usecase, true);
                if changed {
                    info!("peer {ski} supports {usecase}");
                    msgs.push(ObserverMessage::PeerUsecase {
                        ski: ski.clone(),
                        name: usecase.to_string(),
                        supported: true,
                    });
                }
            }
            CapabilityEvent::ValueUpdate { fields } => {
                for field in fields {
                    let value = match payload.read_value(field) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("peer {ski}: {usecase}: keeping previous value: {e}");
                            continue;
                        }
                    };
                    let changed = lock_record(&handle).merge_value(field, value.clone());
                    if changed {
                        msgs.push(ObserverMessage::Values {
                            ski: ski.clone(),
                            field: field.clone(),
                            value,
                        });
                    }
                }
            }
        }

        let entities = payload.entities();
        lock_record(&handle).set_topology(TopologySnapshot::render(entities.clone()));
        msgs.push(ObserverMessage::Entities {
            ski: ski.clone(),
            entities,
        });

        let count = msgs.len();
        self.broadcaster.publish_all(msgs);
        count
    }

    /// Handles a session lifecycle event for peer `ski`.
    pub fn session_event(&self, ski: &PeerId, event: &SessionEvent) {
        let handle = self.broadcaster.registry().get_or_create(ski);

        let changed = match event {
            SessionEvent::Connected => {
                info!("peer {ski} connected");
                lock_record(&handle).set_connected(true)
            }
            SessionEvent::Disconnected => {
                info!("peer {ski} disconnected");
                lock_record(&handle).set_connected(false)
            }
            SessionEvent::Discovered { device } => {
                debug!("peer {ski} discovered");
                lock_record(&handle).set_device(device.clone())
            }
            SessionEvent::TrustDenied => {
                lock_record(&handle).set_connected(false);
                self.broadcaster
                    .record(Severity::Error, &format!("remote service {ski} denied trust"));
                true
            }
        };

        if changed {
            self.broadcaster.publish_peer_list();
        }
    }

    /// Engine log hook.
    pub fn engine_log(&self, severity: Severity, text: &str) {
        self.broadcaster.record(severity, text);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
