//! Infrastructure layer for hems-service.
//!
//! Everything that touches a socket or a file:
//!
//! - `ws_server`: the observer stream (one WebSocket per observer)
//! - `http_api`: polling and command endpoints
//! - `replay_engine`: a [`ProtocolEngine`](crate::application::ProtocolEngine)
//!   that replays recorded events
//! - `storage`: the TOML configuration file
//!
//! Shared state is owned by the application layer; these modules only hold
//! `Arc`s to it.

pub mod http_api;
pub mod replay_engine;
pub mod storage;
pub mod ws_server;

pub use http_api::ApiState;
pub use replay_engine::ReplayEngine;
