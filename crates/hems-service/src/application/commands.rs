//! Outbound writes to remote devices.
//!
//! A write targets a use case ("capability") rather than a single entity:
//! the protocol engine is asked for every remote entity currently offering
//! it (optionally narrowed to one peer), and the value is written to each of
//! them in turn.  One failing entity never stops the others; all failures are
//! collected into a single [`CommandError::Partial`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hems_core::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::peer_registry::PeerRegistry;

/// A remote entity as addressed by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub ski: PeerId,
    pub address: String,
}

impl EntityRef {
    pub fn new(ski: impl Into<PeerId>, address: impl Into<String>) -> Self {
        Self {
            ski: ski.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ski, self.address)
    }
}

/// Failure reported by the protocol engine for one outbound write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("entity not found")]
    UnknownEntity,

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Seam to the external protocol engine for outbound commands.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Remote entities currently offering `usecase`, optionally only those
    /// belonging to `peer`.
    async fn remote_entities(&self, usecase: &str, peer: Option<&PeerId>) -> Vec<EntityRef>;

    /// Writes `value` for `usecase` to one entity.
    async fn write_value(
        &self,
        entity: &EntityRef,
        usecase: &str,
        value: &Value,
    ) -> Result<(), EngineError>;
}

/// One entity that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: EntityRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// At least one entity failed; the others were written.
    #[error("errors: {}", join_failures(.failures))]
    Partial {
        failures: Vec<EntityFailure>,
        written: Vec<EntityRef>,
    },
}

fn join_failures(failures: &[EntityFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.entity, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a fully successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub usecase: String,
    pub written: Vec<EntityRef>,
}

/// Issues capability writes through the engine.
#[derive(Clone)]
pub struct CommandService {
    engine: Arc<dyn ProtocolEngine>,
    registry: Arc<PeerRegistry>,
}

impl CommandService {
    pub fn new(engine: Arc<dyn ProtocolEngine>, registry: Arc<PeerRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Writes `value` to every entity offering `usecase`.
    ///
    /// With `peer` set, only that peer's entities are targeted and the peer
    /// must be known.  No targets at all is not an error.
    pub async fn write_capability_value(
        &self,
        usecase: &str,
        peer: Option<&PeerId>,
        value: &Value,
    ) -> Result<WriteReport, CommandError> {
        if let Some(ski) = peer {
            if self.registry.get(ski).is_none() {
                return Err(CommandError::UnknownPeer(ski.clone()));
            }
        }

        let targets = self.engine.remote_entities(usecase, peer).await;
        if targets.is_empty() {
            warn!("write {usecase}: no remote entities");
        }

        let mut written = Vec::with_capacity(targets.len());
        let mut failures = Vec::new();
        for entity in targets {
            match self.engine.write_value(&entity, usecase, value).await {
                Ok(()) => {
                    info!("write {usecase}: wrote {entity}");
                    written.push(entity);
                }
                Err(e) => {
                    warn!("write {usecase}: {entity} failed: {e}");
                    failures.push(EntityFailure {
                        entity,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(WriteReport {
                usecase: usecase.to_string(),
                written,
            })
        } else {
            Err(CommandError::Partial { failures, written })
        }
    }
}

impl fmt::Debug for CommandService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandService").finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every write and fails the addresses listed in `failing`.
    struct RecordingEngine {
        entities: Vec<EntityRef>,
        failing: Vec<String>,
        writes: Mutex<Vec<(EntityRef, String, Value)>>,
    }

    impl RecordingEngine {
        fn new(entities: Vec<EntityRef>, failing: &[&str]) -> Self {
            Self {
                entities,
                failing: failing.iter().map(|s| s.to_string()).collect(),
                writes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProtocolEngine for RecordingEngine {
        async fn remote_entities(&self, _usecase: &str, peer: Option<&PeerId>) -> Vec<EntityRef> {
            self.entities
                .iter()
                .filter(|e| peer.map_or(true, |p| &e.ski == p))
                .cloned()
                .collect()
        }

        async fn write_value(
            &self,
            entity: &EntityRef,
            usecase: &str,
            value: &Value,
        ) -> Result<(), EngineError> {
            self.writes
                .lock()
                .unwrap()
                .push((entity.clone(), usecase.to_string(), value.clone()));
            if self.failing.contains(&entity.address) {
                return Err(EngineError::Rejected("limit out of range".into()));
            }
            Ok(())
        }
    }

    fn service(engine: Arc<RecordingEngine>, known: &[&str]) -> CommandService {
        let registry = Arc::new(PeerRegistry::new());
        for s in known {
            registry.get_or_create(&PeerId::from(*s));
        }
        CommandService::new(engine, registry)
    }

    #[tokio::test]
    async fn test_all_entities_written_on_success() {
        // Arrange
        let engine = Arc::new(RecordingEngine::new(
            vec![EntityRef::new("a", "[1]"), EntityRef::new("b", "[1]")],
            &[],
        ));
        let svc = service(Arc::clone(&engine), &[]);

        // Act
        let report = svc
            .write_capability_value("LPC", None, &json!({"value": 4200.0}))
            .await
            .unwrap();

        // Assert
        assert_eq!(report.written.len(), 2);
        assert_eq!(engine.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_writes() {
        let engine = Arc::new(RecordingEngine::new(
            vec![EntityRef::new("a", "[1]"), EntityRef::new("a", "[2]")],
            &["[1]"],
        ));
        let svc = service(Arc::clone(&engine), &[]);

        let err = svc
            .write_capability_value("LPC", None, &json!(1))
            .await
            .unwrap_err();

        assert_eq!(engine.writes.lock().unwrap().len(), 2);
        match err {
            CommandError::Partial { failures, written } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(written, vec![EntityRef::new("a", "[2]")]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_message_joins_failures() {
        let engine = Arc::new(RecordingEngine::new(
            vec![EntityRef::new("a", "[1]"), EntityRef::new("b", "[1]")],
            &["[1]"],
        ));
        let svc = service(engine, &[]);

        let err = svc
            .write_capability_value("LPC", None, &json!(1))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "errors: a[1]: write rejected: limit out of range; b[1]: write rejected: limit out of range"
        );
    }

    #[tokio::test]
    async fn test_peer_filter_targets_only_that_peer() {
        let engine = Arc::new(RecordingEngine::new(
            vec![EntityRef::new("a", "[1]"), EntityRef::new("b", "[1]")],
            &[],
        ));
        let svc = service(Arc::clone(&engine), &["b"]);

        let report = svc
            .write_capability_value("LPC", Some(&PeerId::from("b")), &json!(1))
            .await
            .unwrap();

        assert_eq!(report.written, vec![EntityRef::new("b", "[1]")]);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_rejected_before_any_write() {
        let engine = Arc::new(RecordingEngine::new(vec![EntityRef::new("a", "[1]")], &[]));
        let svc = service(Arc::clone(&engine), &[]);

        let err = svc
            .write_capability_value("LPC", Some(&PeerId::from("zz")), &json!(1))
            .await
            .unwrap_err();

        assert_eq!(err, CommandError::UnknownPeer(PeerId::from("zz")));
        assert!(engine.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_targets_is_success() {
        let engine = Arc::new(RecordingEngine::new(vec![], &[]));
        let svc = service(engine, &[]);

        let report = svc.write_capability_value("MPC", None, &json!(1)).await.unwrap();

        assert!(report.written.is_empty());
    }
}
