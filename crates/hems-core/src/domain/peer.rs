//! Per-peer state record.
//!
//! A *peer* is one remote device session, identified by the SKI the protocol
//! engine reports for it.  The record outlives the connection: a peer that
//! disconnects keeps its descriptor, its capability flags and its last known
//! values until somebody removes it explicitly.
//!
//! # Mutation rules
//!
//! - The identifier is fixed at construction and has no setter.
//! - Capability values are merged one field at a time through
//!   [`PeerRecord::merge_value`]; there is no way to replace the whole
//!   payload.
//! - Every setter that can be a no-op returns `bool` ("did anything change?")
//!   so the caller can decide whether the change is worth a broadcast.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::topology::TopologySnapshot;

/// Stable identifier of a remote device session (the device SKI).
///
/// Opaque to the registry: it is compared byte-for-byte and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(ski: impl Into<String>) -> Self {
        Self(ski.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Descriptive metadata a device announces during discovery.
///
/// Filled in independently of the connection state: a device can be visible
/// on the network (and therefore described) without a live session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

/// Authoritative state of one remote device session.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    ski: PeerId,
    connected: bool,
    last_seen: DateTime<Utc>,
    usecases: BTreeMap<String, bool>,
    values: Map<String, Value>,
    device: Option<DeviceDescriptor>,
    topology: Option<TopologySnapshot>,
}

impl PeerRecord {
    /// Creates an empty, disconnected record.
    ///
    /// `seed` is the current process-wide use-case enablement table; each
    /// entry becomes the peer's initial support flag for that use case.
    pub fn new<'a, I>(ski: PeerId, seed: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a bool)>,
    {
        Self {
            ski,
            connected: false,
            last_seen: Utc::now(),
            usecases: seed.into_iter().map(|(k, v)| (k.clone(), *v)).collect(),
            values: Map::new(),
            device: None,
            topology: None,
        }
    }

    pub fn ski(&self) -> &PeerId {
        &self.ski
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Per-use-case support flags, ordered by name.
    pub fn usecases(&self) -> &BTreeMap<String, bool> {
        &self.usecases
    }

    /// Support flag for `usecase`, or `None` if the peer has never heard of it.
    pub fn supports(&self, usecase: &str) -> Option<bool> {
        self.usecases.get(usecase).copied()
    }

    /// The accumulated capability values as a JSON object.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    pub fn topology(&self) -> Option<&TopologySnapshot> {
        self.topology.as_ref()
    }

    /// Refreshes `last_seen` to now.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Sets the connection flag.  Returns `true` if the flag changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        self.touch();
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }

    /// Sets the support flag for `usecase`.  Returns `true` only when the
    /// stored value actually changed (a first write counts as a change).
    pub fn set_support(&mut self, usecase: &str, supported: bool) -> bool {
        match self.usecases.get_mut(usecase) {
            Some(current) if *current == supported => false,
            Some(current) => {
                *current = supported;
                true
            }
            None => {
                self.usecases.insert(usecase.to_string(), supported);
                true
            }
        }
    }

    /// Overwrites exactly one field of the capability values.
    ///
    /// Returns `true` if the stored value differs from what was there before.
    pub fn merge_value(&mut self, field: &str, value: Value) -> bool {
        match self.values.get(field) {
            Some(existing) if *existing == value => false,
            _ => {
                self.values.insert(field.to_string(), value);
                true
            }
        }
    }

    /// Replaces the descriptor.  Returns `true` if it changed.
    pub fn set_device(&mut self, device: DeviceDescriptor) -> bool {
        if self.device.as_ref() == Some(&device) {
            return false;
        }
        self.device = Some(device);
        true
    }

    pub fn set_topology(&mut self, topology: TopologySnapshot) {
        self.topology = Some(topology);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
