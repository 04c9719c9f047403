//! Integration tests for the observer wire format.
//!
//! These build messages the way the service does (from peer records, log
//! entries and rendered topologies) and check the JSON the front end reads.

use std::collections::BTreeMap;

use hems_core::{
    DeviceDescriptor, EntityInfo, FeatureInfo, IdentifierCorrelator, LogRingBuffer,
    ObserverMessage, OperationInfo, PeerId, PeerRecord, Severity, TopologySnapshot,
};
use serde_json::{json, Value};

const SKI: &str = "1a2b3c4d5e6f708192a3b4c5d6e7f80910a1b2c3";

fn to_json(msg: &ObserverMessage) -> Value {
    serde_json::to_value(msg).expect("observer messages always serialize")
}

fn seed() -> BTreeMap<String, bool> {
    [("LPC".to_string(), false), ("MPC".to_string(), true)]
        .into_iter()
        .collect()
}

#[test]
fn test_peers_message_reflects_record_state() {
    // Arrange
    let globals = seed();
    let mut rec = PeerRecord::new(PeerId::from(SKI), &globals);
    rec.set_connected(true);
    rec.set_support("LPC", true);
    rec.set_device(DeviceDescriptor {
        brand: Some("Demo".into()),
        model: Some("Wallbox 11".into()),
        ..DeviceDescriptor::default()
    });

    // Act
    let v = to_json(&ObserverMessage::peers([&rec]));

    // Assert
    assert_eq!(v["type"], "peers");
    let peer = &v["peers"][0];
    assert_eq!(peer["ski"], SKI);
    assert_eq!(peer["connected"], true);
    assert_eq!(peer["usecases"], json!({"LPC": true, "MPC": true}));
    assert_eq!(peer["device"]["brand"], "Demo");
    assert!(peer["device"].get("serial").is_none());
    assert!(peer["last_seen"].is_string());
}

#[test]
fn test_undiscovered_peer_omits_device() {
    let rec = PeerRecord::new(PeerId::from("abc"), &BTreeMap::<String, bool>::new());
    let v = to_json(&ObserverMessage::peers([&rec]));
    assert!(v["peers"][0].get("device").is_none());
    assert_eq!(v["peers"][0]["connected"], false);
}

#[test]
fn test_correlated_log_line_carries_ski() {
    // Arrange
    let buffer = LogRingBuffer::new(8);
    let correlator = IdentifierCorrelator::default();
    let known = [PeerId::from(SKI)];
    let text = format!("ship: hello received from {SKI}");

    // Act
    let tagged = correlator.correlate(&text, &known);
    let entry = buffer.append(Severity::Trace, text.clone(), tagged);
    let untagged = buffer.append(Severity::Info, "service started".into(), None);

    // Assert
    let v = to_json(&ObserverMessage::from(&entry));
    assert_eq!(v, json!({"type": "log", "seq": 1, "line": text, "ski": SKI}));
    let v = to_json(&ObserverMessage::from(&untagged));
    assert_eq!(v["seq"], 2);
    assert!(v.get("ski").is_none());
}

#[test]
fn test_entities_message_uses_front_end_field_names() {
    // Arrange
    let topology = TopologySnapshot::render(vec![EntityInfo {
        address: "[1]".into(),
        entity_type: "EVSE".into(),
        features: vec![FeatureInfo {
            id: Some("[1,2]".into()),
            name: "LoadControl".into(),
            roles: Some("server".into()),
            operations: vec![OperationInfo {
                op: "write".into(),
                name: "loadControlLimitListData".into(),
            }],
        }],
    }]);

    // Act
    let v = to_json(&ObserverMessage::Entities {
        ski: PeerId::from(SKI),
        entities: topology.entities.clone(),
    });

    // Assert
    assert_eq!(v["type"], "entities");
    let entity = &v["entities"][0];
    assert_eq!(entity["entityType"], "EVSE");
    assert_eq!(entity["features"][0]["name"], "LoadControl");
    assert_eq!(entity["features"][0]["operations"][0]["op"], "write");
}

#[test]
fn test_front_end_messages_parse_back() {
    let raw = r#"{"type":"peer_usecase","ski":"abc","name":"LPC","supported":true}"#;
    let msg: ObserverMessage = serde_json::from_str(raw).unwrap();
    assert_eq!(msg.kind(), "peer_usecase");
    assert_eq!(msg.log_seq(), None);
}

#[test]
fn test_unknown_message_type_is_rejected() {
    let raw = r#"{"type":"reboot","ski":"abc"}"#;
    assert!(serde_json::from_str::<ObserverMessage>(raw).is_err());
}
