//! Domain events reported by the external protocol engine.
//!
//! The engine calls back once per event, from whatever task or thread it
//! happens to be running on.  Two families of events exist:
//!
//! - [`SessionEvent`] – lifecycle of the device session itself (connected,
//!   disconnected, discovered on the network, trust denied during pairing).
//! - [`CapabilityEvent`] – something about one use case changed: the remote
//!   side announced support for it, or one or more of its values changed.
//!
//! Capability events carry an [`EventPayload`], the engine's accessor for the
//! values and the device tree *at the moment of the event*.  Reading through
//! it can fail (the remote data may be incomplete); such failures are
//! expected and never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::peer::DeviceDescriptor;
use crate::domain::topology::EntityInfo;

/// A value could not be read from the remote device at this instant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// The remote side has not (yet) provided the data.
    #[error("{field}: data not available")]
    NotAvailable { field: String },

    /// The data exists but could not be interpreted.
    #[error("{field}: malformed data: {reason}")]
    Malformed { field: String, reason: String },
}

/// Lifecycle events of a device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// Descriptor learned from discovery; does not imply a live session.
    Discovered { device: DeviceDescriptor },
    /// The remote service refused to trust us during pairing.
    TrustDenied,
}

/// Per-use-case events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityEvent {
    /// The remote device announced support for the use case.
    SupportUpdate,
    /// The listed value fields changed on the remote device.
    ValueUpdate { fields: Vec<String> },
}

/// Accessor handed over with every capability event.
#[cfg_attr(test, mockall::automock)]
pub trait EventPayload: Send + Sync {
    /// Reads the current value of `field` for the event's use case.
    fn read_value(&self, field: &str) -> Result<Value, AccessError>;

    /// The device's current entity/feature/operation tree.
    fn entities(&self) -> Vec<EntityInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_event_json_shape() {
        let ev = CapabilityEvent::ValueUpdate {
            fields: vec!["limit".into()],
        };
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({"kind": "value_update", "fields": ["limit"]})
        );
    }

    #[test]
    fn test_session_event_discovered_round_trips() {
        let ev: SessionEvent = serde_json::from_value(json!({
            "kind": "discovered",
            "device": {"brand": "Demo", "serial": "42"}
        }))
        .unwrap();
        match ev {
            SessionEvent::Discovered { device } => {
                assert_eq!(device.brand.as_deref(), Some("Demo"));
                assert_eq!(device.serial.as_deref(), Some("42"));
                assert!(device.model.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_mock_payload_reports_access_error() {
        let mut payload = MockEventPayload::new();
        payload
            .expect_read_value()
            .returning(|f| Err(AccessError::NotAvailable { field: f.to_string() }));

        let err = payload.read_value("limit").unwrap_err();

        assert_eq!(err.to_string(), "limit: data not available");
    }
}
