//! Rendered view of a peer's exposed entity/feature/operation tree.
//!
//! The protocol engine knows the full SPINE device model.  Observers only
//! need a flattened picture of it: which entities the device exposes, which
//! features each entity carries, and which operations each feature accepts.
//! The JSON field names here are what the web front end reads, so they keep
//! the camelCase spelling it expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One operation a feature accepts (e.g. `read`, `write`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub op: String,
    pub name: String,
}

/// One feature of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<OperationInfo>,
}

/// One entity of a remote device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub address: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(default)]
    pub features: Vec<FeatureInfo>,
}

/// The last rendering of a peer's topology, cached on the peer record so a
/// late-joining observer can be handed it straight away.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologySnapshot {
    pub entities: Vec<EntityInfo>,
    pub rendered_at: DateTime<Utc>,
}

impl TopologySnapshot {
    pub fn render(entities: Vec<EntityInfo>) -> Self {
        Self {
            entities,
            rendered_at: Utc::now(),
        }
    }

    /// Addresses of all entities, in rendering order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.address.as_str())
    }
}
