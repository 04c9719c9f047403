//! Integration tests for outbound capability writes.
//!
//! `CommandService` is exercised against a hand-written recording engine and
//! against the replay engine fed with a short recording.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hems_core::PeerId;
use hems_service::application::{
    Broadcaster, CommandError, CommandService, EngineError, EntityRef, EventRouter, PeerRegistry,
    ProtocolEngine,
};
use hems_service::infrastructure::ReplayEngine;
use serde_json::{json, Value};

/// Engine double with a fixed entity list; entities named in `failing`
/// reject every write with the paired reason.
struct ScriptedEngine {
    entities: Vec<EntityRef>,
    failing: Vec<(EntityRef, String)>,
    attempted: Mutex<Vec<EntityRef>>,
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    async fn remote_entities(&self, _usecase: &str, _peer: Option<&PeerId>) -> Vec<EntityRef> {
        self.entities.clone()
    }

    async fn write_value(
        &self,
        entity: &EntityRef,
        _usecase: &str,
        _value: &Value,
    ) -> Result<(), EngineError> {
        self.attempted.lock().unwrap().push(entity.clone());
        match self.failing.iter().find(|(e, _)| e == entity) {
            Some((_, reason)) => Err(EngineError::Rejected(reason.clone())),
            None => Ok(()),
        }
    }
}

// ── Scenario C ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_aggregated_error_names_only_the_failing_entity() {
    // Arrange: three entities, the second one rejects
    let e1 = EntityRef::new("ski-a", "[1]");
    let e2 = EntityRef::new("ski-b", "[2]");
    let e3 = EntityRef::new("ski-c", "[3]");
    let engine = Arc::new(ScriptedEngine {
        entities: vec![e1.clone(), e2.clone(), e3.clone()],
        failing: vec![(e2.clone(), "limit above nominal max".into())],
        attempted: Mutex::new(Vec::new()),
    });
    let svc = CommandService::new(engine.clone(), Arc::new(PeerRegistry::new()));

    // Act
    let err = svc
        .write_capability_value("LPC", None, &json!({"duration": 3600, "value": 4200.0}))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(
        *engine.attempted.lock().unwrap(),
        vec![e1.clone(), e2.clone(), e3.clone()],
        "a failure must not stop the remaining writes"
    );
    let CommandError::Partial { failures, written } = &err else {
        panic!("expected a partial failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entity, e2);
    assert_eq!(failures[0].reason, "write rejected: limit above nominal max");
    assert_eq!(written, &vec![e1.clone(), e3.clone()]);

    let text = err.to_string();
    assert!(text.contains(&e2.to_string()));
    assert!(text.contains("limit above nominal max"));
    assert!(!text.contains(&e1.to_string()));
    assert!(!text.contains(&e3.to_string()));
}

// ── Through the replay engine ─────────────────────────────────────────────────

const RECORDING: &str = r#"
{"type":"session","ski":"evse-1","event":{"kind":"connected"}}
{"type":"capability","ski":"evse-1","usecase":"LPC","event":{"kind":"support_update"},"entities":[{"address":"[1]","entityType":"EVSE"}]}
{"type":"session","ski":"evse-2","event":{"kind":"connected"}}
{"type":"capability","ski":"evse-2","usecase":"LPC","event":{"kind":"support_update"},"entities":[{"address":"[1]","entityType":"EVSE"}]}
{"type":"session","ski":"evse-2","event":{"kind":"disconnected"}}
"#;

#[tokio::test]
async fn test_write_through_replay_engine_targets_connected_supporting_peers() {
    // Arrange
    let registry = Arc::new(PeerRegistry::with_usecases([("LPC", false)]));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), 100));
    let engine = Arc::new(ReplayEngine::new(EventRouter::new(broadcaster)));
    engine.replay(RECORDING.as_bytes()).await.unwrap();
    let svc = CommandService::new(engine.clone(), registry);

    // Act
    let report = svc
        .write_capability_value("LPC", None, &json!({"failsafePowerLimit": 1000.0}))
        .await
        .unwrap();

    // Assert
    assert_eq!(report.written, vec![EntityRef::new("evse-1", "[1]")]);
    assert_eq!(engine.writes().len(), 1);
}

#[tokio::test]
async fn test_write_to_named_offline_peer_reports_nothing_written() {
    let registry = Arc::new(PeerRegistry::with_usecases([("LPC", false)]));
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry), 100));
    let engine = Arc::new(ReplayEngine::new(EventRouter::new(broadcaster)));
    engine.replay(RECORDING.as_bytes()).await.unwrap();
    let svc = CommandService::new(engine.clone(), registry);

    let report = svc
        .write_capability_value("LPC", Some(&PeerId::from("evse-2")), &json!(1))
        .await
        .unwrap();

    assert!(report.written.is_empty());
    assert!(engine.writes().is_empty());
}
