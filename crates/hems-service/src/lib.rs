//! hems-service library crate.
//!
//! Multi-peer session registry and observer fan-out for the HEMS device
//! tester.  The protocol engine reports events; this crate keeps one record
//! per remote device and streams every change to attached observers.
//!
//! # Architecture
//!
//! ```text
//! protocol engine (replay adapter or real stack)
//!         │ events, log lines             ▲ writes
//!         ▼                               │
//! [hems-service]
//!   ├── application/
//!   │     ├── event_router   events → PeerRegistry → Broadcaster
//!   │     ├── broadcaster    serialize once → SubscriberSet → observers
//!   │     └── commands       capability writes, aggregated failures
//!   └── infrastructure/
//!         ├── ws_server      observer stream (tokio-tungstenite)
//!         ├── http_api       polling + command surface (axum)
//!         ├── replay_engine  JSONL event replay, implements ProtocolEngine
//!         └── storage        TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `application` holds the shared state and never touches a socket.
//! - `infrastructure` adapts application types to the network and files.
//! - Pure domain types live in `hems-core`.

/// Application layer: registry, fan-out, routing and commands.
pub mod application;

/// Infrastructure layer: servers, engine adapter, configuration.
pub mod infrastructure;
