//! JSON messages streamed to observers.
//!
//! Every state change in the registry is announced to all attached observers
//! (the browser UI, test scripts) as one WebSocket text frame carrying one of
//! the [`ObserverMessage`] variants.
//!
//! # JSON discriminant
//!
//! Every message is a flat JSON object with a `"type"` field naming the
//! variant; all other fields sit next to it:
//!
//! ```json
//! {"type":"usecase","name":"LPC","supported":false}
//! {"type":"peer_usecase","ski":"ABC123","name":"LPC","supported":true}
//! {"type":"log","seq":17,"line":"2024-05-01 12:00:00 INFO paired"}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute produces exactly this layout.
//!
//! # Snapshot vs. delta
//!
//! The same message kinds serve both purposes.  A newly attached observer
//! first receives `log` lines for the retained history, one `usecase` per
//! globally known use case, a `peers` list and an `entities` message for
//! every peer with a cached topology.  After that it receives deltas as they
//! happen.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::log_buffer::LogEntry;
use crate::domain::peer::{DeviceDescriptor, PeerId, PeerRecord};
use crate::domain::topology::EntityInfo;

/// All messages the service pushes to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    /// The set of peers or their connection state changed.
    Peers { peers: Vec<PeerSummary> },

    /// Process-wide enablement of a use case changed.
    Usecase { name: String, supported: bool },

    /// One peer's support flag for a use case changed.
    PeerUsecase {
        ski: PeerId,
        name: String,
        supported: bool,
    },

    /// Fresh rendering of one peer's entity/feature tree.
    Entities {
        ski: PeerId,
        entities: Vec<EntityInfo>,
    },

    /// One capability value field of one peer changed.
    Values {
        ski: PeerId,
        field: String,
        value: Value,
    },

    /// One line of the retained log.
    Log {
        seq: u64,
        line: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ski: Option<PeerId>,
    },
}

impl ObserverMessage {
    /// Short name of the variant, safe to put in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ObserverMessage::Peers { .. } => "peers",
            ObserverMessage::Usecase { .. } => "usecase",
            ObserverMessage::PeerUsecase { .. } => "peer_usecase",
            ObserverMessage::Entities { .. } => "entities",
            ObserverMessage::Values { .. } => "values",
            ObserverMessage::Log { .. } => "log",
        }
    }

    /// Sequence number for `log` messages, `None` for everything else.
    pub fn log_seq(&self) -> Option<u64> {
        match self {
            ObserverMessage::Log { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    pub fn peers<'a>(records: impl IntoIterator<Item = &'a PeerRecord>) -> Self {
        ObserverMessage::Peers {
            peers: records.into_iter().map(PeerSummary::from).collect(),
        }
    }
}

impl From<&LogEntry> for ObserverMessage {
    fn from(entry: &LogEntry) -> Self {
        ObserverMessage::Log {
            seq: entry.seq,
            line: entry.line.clone(),
            ski: entry.ski.clone(),
        }
    }
}

/// Poll-surface view of one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub ski: PeerId,
    pub connected: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    pub usecases: BTreeMap<String, bool>,
}

impl From<&PeerRecord> for PeerSummary {
    fn from(r: &PeerRecord) -> Self {
        Self {
            ski: r.ski().clone(),
            connected: r.connected(),
            last_seen: r.last_seen(),
            device: r.device().cloned(),
            usecases: r.usecases().clone(),
        }
    }
}

/// One row of the global use-case enablement table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsecaseState {
    pub name: String,
    pub supported: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
