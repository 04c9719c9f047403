//! Fan-out of state changes to every attached observer.
//!
//! The broadcaster ties together the three process-wide singletons: the
//! [`PeerRegistry`], the [`SubscriberSet`] and the [`LogRingBuffer`].  It is
//! the only place that turns state into [`ObserverMessage`]s for delivery.
//!
//! # Publishing
//!
//! ```text
//! publish(msg) ─► serialize once ─► SubscriberSet::deliver ─► try_send × N
//!                     │                                        └─ evict failures
//!                     └─ error? log it, skip this message
//! ```
//!
//! # Engine log lines
//!
//! [`Broadcaster::record`] is the sink for the protocol engine's free-text
//! trace output.  The line is formatted, tagged with a best-guess peer,
//! appended to the ring buffer and only then broadcast, so an observer that
//! attaches in between finds it in its snapshot.

use std::sync::Arc;

use chrono::Local;
use hems_core::{
    IdentifierCorrelator, LogEntry, LogRingBuffer, ObserverMessage, PeerId, PeerRecord, Severity,
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::peer_registry::PeerRegistry;
use super::subscribers::{Envelope, SubscriberSet, Subscription};

/// Which low-severity engine lines are mirrored to the process log.
///
/// INFO and above are always mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoLevels {
    pub trace: bool,
    pub debug: bool,
}

/// Process-wide publisher.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<PeerRegistry>,
    subscribers: SubscriberSet,
    logs: LogRingBuffer,
    correlator: IdentifierCorrelator,
    echo: EchoLevels,
}

impl Broadcaster {
    /// Creates a broadcaster with a log buffer of `log_capacity` lines
    /// (zero selects the default) and default per-observer queues.
    pub fn new(registry: Arc<PeerRegistry>, log_capacity: usize) -> Self {
        Self {
            registry,
            subscribers: SubscriberSet::default(),
            logs: LogRingBuffer::new(log_capacity),
            correlator: IdentifierCorrelator::default(),
            echo: EchoLevels::default(),
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.subscribers = SubscriberSet::new(depth);
        self
    }

    pub fn with_echo(mut self, echo: EchoLevels) -> Self {
        self.echo = echo;
        self
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn logs(&self) -> &LogRingBuffer {
        &self.logs
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    /// Attaches a new observer.
    ///
    /// The observer is registered before the snapshot is taken, so nothing
    /// published afterwards can be missed.  The snapshot holds, in order:
    /// the retained log, one `usecase` per globally known use case, the
    /// peer list and the cached topology of every peer that has one.
    pub fn subscribe(&self) -> Subscription {
        let (id, rx) = self.subscribers.attach();

        let (entries, watermark) = self.logs.snapshot_with_watermark();
        let mut msgs: Vec<ObserverMessage> = entries.iter().map(ObserverMessage::from).collect();
        msgs.extend(
            self.registry
                .globals()
                .into_iter()
                .map(|(name, supported)| ObserverMessage::Usecase { name, supported }),
        );
        let peers = self.registry.all();
        msgs.push(ObserverMessage::peers(&peers));
        msgs.extend(peers.iter().filter_map(|p| {
            p.topology().map(|t| ObserverMessage::Entities {
                ski: p.ski().clone(),
                entities: t.entities.clone(),
            })
        }));

        let snapshot = msgs.iter().filter_map(encode).collect();
        Subscription::new(id, snapshot, rx, watermark)
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.subscribers.detach(id)
    }

    // ── Publishing ────────────────────────────────────────────────────────────

    /// Delivers `msg` to every observer.  Returns how many accepted it.
    pub fn publish(&self, msg: &ObserverMessage) -> usize {
        match encode(msg) {
            Some(env) => self.subscribers.deliver(&env),
            None => 0,
        }
    }

    /// Delivers a batch of messages produced by one event, in order.
    pub fn publish_all(&self, msgs: Vec<ObserverMessage>) {
        for msg in &msgs {
            self.publish(msg);
        }
    }

    /// Broadcasts the current peer list.
    pub fn publish_peer_list(&self) -> usize {
        let peers = self.registry.all();
        self.publish(&ObserverMessage::peers(&peers))
    }

    // ── State changes that broadcast ─────────────────────────────────────────

    /// Sets one peer's support flag and broadcasts a `peer_usecase` message
    /// only if the flag changed.  Returns `None` for an unknown peer.
    pub fn set_supported(&self, ski: &PeerId, usecase: &str, supported: bool) -> Option<bool> {
        let changed = self.registry.set_supported(ski, usecase, supported)?;
        if changed {
            self.publish(&ObserverMessage::PeerUsecase {
                ski: ski.clone(),
                name: usecase.to_string(),
                supported,
            });
        }
        Some(changed)
    }

    /// Changes the process-wide enablement of `usecase`.
    ///
    /// The value is written into every peer, so the peer list is broadcast
    /// as well.  Returns `true` if the global table changed; a write that
    /// changes nothing publishes nothing.
    pub fn set_global_enablement(&self, usecase: &str, enabled: bool) -> bool {
        if !self.registry.set_global(usecase, enabled) {
            return false;
        }
        info!("use case {usecase} globally {}", if enabled { "enabled" } else { "disabled" });

        let peers = self.registry.all();
        self.publish_all(vec![
            ObserverMessage::Usecase {
                name: usecase.to_string(),
                supported: enabled,
            },
            ObserverMessage::peers(&peers),
        ]);
        true
    }

    /// Removes a peer and tells observers.
    pub fn remove_peer(&self, ski: &PeerId) -> Option<PeerRecord> {
        let removed = self.registry.remove(ski)?;
        info!("peer {ski} removed");
        self.publish_peer_list();
        Some(removed)
    }

    // ── Engine log sink ──────────────────────────────────────────────────────

    /// Formats, tags, retains and broadcasts one engine log line.
    pub fn record(&self, severity: Severity, text: &str) -> LogEntry {
        let line = LogEntry::compose(&Local::now(), severity, text);
        let known = self.registry.ids();
        let ski = self.correlator.correlate(text, &known);

        let entry = self.logs.append(severity, line, ski);
        self.mirror(&entry);
        self.publish(&ObserverMessage::from(&entry));
        entry
    }

    fn mirror(&self, entry: &LogEntry) {
        let line = entry.line.as_str();
        match entry.severity {
            Severity::Trace if self.echo.trace => trace!(target: "engine", "{line}"),
            Severity::Debug if self.echo.debug => debug!(target: "engine", "{line}"),
            Severity::Trace | Severity::Debug => {}
            Severity::Info => info!(target: "engine", "{line}"),
            Severity::Warn => warn!(target: "engine", "{line}"),
            Severity::Error => error!(target: "engine", "{line}"),
        }
    }
}

fn encode(msg: &ObserverMessage) -> Option<Envelope> {
    match Envelope::encode(msg) {
        Ok(env) => Some(env),
        Err(e) => {
            error!("dropping {} message: {e}", msg.kind());
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
