//! Protocol engine adapter that replays recorded events.
//!
//! The SHIP/SPINE stack lives outside this service.  To drive the pipeline
//! without it, the replay engine reads newline-delimited JSON records and
//! feeds them through the [`EventRouter`] exactly as a live engine would:
//!
//! ```json
//! {"type":"session","ski":"abc","event":{"kind":"connected"}}
//! {"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"support_update"},"entities":[{"address":"[1]","entityType":"EVSE"}]}
//! {"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"value_update","fields":["limit"]},"values":{"limit":4200.0}}
//! {"type":"log","severity":"trace","text":"ship: hello from abc"}
//! {"type":"pause","ms":250}
//! ```
//!
//! A capability record without `entities` leaves the peer's cached topology
//! as it is.
//!
//! Outbound writes are answered from what has been replayed so far: the
//! targets of a use case are the cached entities of every connected peer
//! that supports it, and each accepted write is recorded and logged.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hems_core::{
    AccessError, CapabilityEvent, EntityInfo, EventPayload, PeerId, SessionEvent, Severity,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::application::{lock_record, EngineError, EntityRef, EventRouter, ProtocolEngine};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error reading events at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One line of an event recording.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    Session {
        ski: PeerId,
        event: SessionEvent,
    },
    Capability {
        ski: PeerId,
        usecase: String,
        event: CapabilityEvent,
        #[serde(default)]
        values: Map<String, Value>,
        /// `None` keeps the topology already cached for the peer.
        #[serde(default)]
        entities: Option<Vec<EntityInfo>>,
    },
    Log {
        severity: Severity,
        text: String,
    },
    Pause {
        ms: u64,
    },
}

/// Payload accessor backed by the recorded values.
#[derive(Debug)]
struct RecordedPayload<'a> {
    values: &'a Map<String, Value>,
    entities: Vec<EntityInfo>,
}

impl EventPayload for RecordedPayload<'_> {
    fn read_value(&self, field: &str) -> Result<Value, AccessError> {
        self.values
            .get(field)
            .cloned()
            .ok_or_else(|| AccessError::NotAvailable {
                field: field.to_string(),
            })
    }

    fn entities(&self) -> Vec<EntityInfo> {
        self.entities.clone()
    }
}

/// Counters reported after a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub skipped: usize,
}

/// A write accepted by the replay engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub entity: EntityRef,
    pub usecase: String,
    pub value: Value,
}

/// Replaying [`ProtocolEngine`] implementation.
#[derive(Debug)]
pub struct ReplayEngine {
    router: EventRouter,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl ReplayEngine {
    pub fn new(router: EventRouter) -> Self {
        Self {
            router,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Writes accepted so far, oldest first.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Feeds one record to the router.
    pub async fn apply(&self, record: &ReplayRecord) {
        match record {
            ReplayRecord::Session { ski, event } => self.router.session_event(ski, event),
            ReplayRecord::Capability {
                ski,
                usecase,
                event,
                values,
                entities,
            } => {
                let entities = match entities {
                    Some(entities) => entities.clone(),
                    None => self.cached_entities(ski),
                };
                let payload = RecordedPayload { values, entities };
                self.router.dispatch(ski, usecase, event, &payload);
            }
            ReplayRecord::Log { severity, text } => self.router.engine_log(*severity, text),
            ReplayRecord::Pause { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }
    }

    fn cached_entities(&self, ski: &PeerId) -> Vec<EntityInfo> {
        let Some(handle) = self.router.broadcaster().registry().get(ski) else {
            return Vec::new();
        };
        let rec = lock_record(&handle);
        rec.topology().map(|t| t.entities.clone()).unwrap_or_default()
    }

    /// Replays every line of `reader`.  Blank lines are ignored; lines that
    /// do not parse are logged and skipped.
    pub async fn replay<R>(&self, reader: R) -> std::io::Result<ReplayStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = ReplayStats::default();
        let mut lines = reader.lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ReplayRecord>(line) {
                Ok(record) => {
                    self.apply(&record).await;
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!("replay line {line_no}: skipped: {e}");
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Opens `path` and replays it.
    pub async fn replay_file(&self, path: &Path) -> Result<ReplayStats, ReplayError> {
        let io_err = |source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let stats = self.replay(BufReader::new(file)).await.map_err(io_err)?;
        info!(
            "replayed {}: {} applied, {} skipped",
            path.display(),
            stats.applied,
            stats.skipped
        );
        Ok(stats)
    }
}

#[async_trait]
impl ProtocolEngine for ReplayEngine {
    async fn remote_entities(&self, usecase: &str, peer: Option<&PeerId>) -> Vec<EntityRef> {
        let mut out = Vec::new();
        for rec in self.router.broadcaster().registry().all() {
            if peer.is_some_and(|p| p != rec.ski()) {
                continue;
            }
            if !rec.connected() || rec.supports(usecase) != Some(true) {
                continue;
            }
            if let Some(topology) = rec.topology() {
                out.extend(
                    topology
                        .addresses()
                        .map(|addr| EntityRef::new(rec.ski().clone(), addr)),
                );
            }
        }
        out
    }

    async fn write_value(
        &self,
        entity: &EntityRef,
        usecase: &str,
        value: &Value,
    ) -> Result<(), EngineError> {
        let handle = self
            .router
            .broadcaster()
            .registry()
            .get(&entity.ski)
            .ok_or(EngineError::UnknownEntity)?;
        {
            let rec = lock_record(&handle);
            if !rec.connected() {
                return Err(EngineError::Unavailable(format!("{} is offline", entity.ski)));
            }
            let known = rec
                .topology()
                .is_some_and(|t| t.addresses().any(|a| a == entity.address));
            if !known {
                return Err(EngineError::UnknownEntity);
            }
        }

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedWrite {
                entity: entity.clone(),
                usecase: usecase.to_string(),
                value: value.clone(),
            });
        self.router
            .engine_log(Severity::Info, &format!("write {usecase} to {entity}: {value}"));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::application::{Broadcaster, PeerRegistry};

    const RECORDING: &str = r#"
{"type":"session","ski":"abc","event":{"kind":"connected"}}
{"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"support_update"},"entities":[{"address":"[1]","entityType":"EVSE"},{"address":"[2]","entityType":"EV"}]}
{"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"value_update","fields":["limit","missing"]},"values":{"limit":4200.0},"entities":[{"address":"[1]","entityType":"EVSE"},{"address":"[2]","entityType":"EV"}]}
not json at all
{"type":"log","severity":"trace","text":"ship: data for abc"}
{"type":"pause","ms":1}
"#;

    fn engine() -> ReplayEngine {
        let registry = Arc::new(PeerRegistry::with_usecases([("LPC", false), ("MPC", false)]));
        let broadcaster = Arc::new(Broadcaster::new(registry, 32));
        ReplayEngine::new(EventRouter::new(broadcaster))
    }

    async fn replayed() -> ReplayEngine {
        let e = engine();
        e.replay(RECORDING.as_bytes()).await.unwrap();
        e
    }

    #[tokio::test]
    async fn test_replay_counts_applied_and_skipped_lines() {
        let e = engine();
        let stats = e.replay(RECORDING.as_bytes()).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 5, skipped: 1 });
    }

    #[tokio::test]
    async fn test_replay_updates_registry() {
        // Arrange / Act
        let e = replayed().await;

        // Assert
        let rec = e.router.broadcaster().registry().all().remove(0);
        assert!(rec.connected());
        assert_eq!(rec.supports("LPC"), Some(true));
        assert_eq!(rec.values()["limit"], json!(4200.0));
        assert!(rec.values().get("missing").is_none());
        assert_eq!(rec.topology().map(|t| t.entities.len()), Some(2));
    }

    #[tokio::test]
    async fn test_replayed_log_line_is_tagged() {
        let e = replayed().await;
        let logs = e.router.broadcaster().logs().snapshot();
        let entry = logs.iter().find(|l| l.line.contains("ship: data")).unwrap();
        assert_eq!(entry.ski, Some(PeerId::from("abc")));
        assert_eq!(entry.severity, Severity::Trace);
    }

    #[tokio::test]
    async fn test_remote_entities_only_for_supported_usecase() {
        let e = replayed().await;
        assert_eq!(e.remote_entities("LPC", None).await.len(), 2);
        assert!(e.remote_entities("MPC", None).await.is_empty());
        assert!(e
            .remote_entities("LPC", Some(&PeerId::from("other")))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_write_is_recorded_and_logged() {
        let e = replayed().await;
        let target = EntityRef::new("abc", "[1]");

        e.write_value(&target, "LPC", &json!({"value": 3000.0}))
            .await
            .unwrap();

        let writes = e.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].entity, target);
        let last = e.router.broadcaster().logs().snapshot().pop().unwrap();
        assert!(last.line.contains("write LPC to abc[1]"));
    }

    #[tokio::test]
    async fn test_write_to_unknown_entity_fails() {
        let e = replayed().await;
        let err = e
            .write_value(&EntityRef::new("abc", "[9]"), "LPC", &json!(1))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::UnknownEntity);
    }

    #[tokio::test]
    async fn test_write_to_offline_peer_fails() {
        let e = replayed().await;
        let ski = PeerId::from("abc");
        e.apply(&ReplayRecord::Session {
            ski,
            event: SessionEvent::Disconnected,
        })
        .await;

        let err = e
            .write_value(&EntityRef::new("abc", "[1]"), "LPC", &json!(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_value_update_without_entities_keeps_topology() {
        // Arrange
        let e = engine();
        let recording = r#"
{"type":"session","ski":"abc","event":{"kind":"connected"}}
{"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"support_update"},"entities":[{"address":"[1]","entityType":"EVSE"}]}
{"type":"capability","ski":"abc","usecase":"LPC","event":{"kind":"value_update","fields":["limit"]},"values":{"limit":4200.0}}
"#;

        // Act
        e.replay(recording.as_bytes()).await.unwrap();

        // Assert
        let rec = e.router.broadcaster().registry().all().remove(0);
        assert_eq!(rec.values()["limit"], json!(4200.0));
        assert_eq!(rec.topology().map(|t| t.entities.len()), Some(1));
        assert_eq!(
            e.remote_entities("LPC", None).await,
            vec![EntityRef::new("abc", "[1]")]
        );
    }

    #[tokio::test]
    async fn test_explicit_empty_entities_clears_topology() {
        let e = replayed().await;
        e.apply(&ReplayRecord::Capability {
            ski: PeerId::from("abc"),
            usecase: "LPC".into(),
            event: CapabilityEvent::SupportUpdate,
            values: Map::new(),
            entities: Some(Vec::new()),
        })
        .await;

        assert!(e.remote_entities("LPC", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let e = engine();
        let path = std::env::temp_dir().join("hems-no-such-recording.jsonl");
        assert!(matches!(
            e.replay_file(&path).await,
            Err(ReplayError::Io { .. })
        ));
    }
}
