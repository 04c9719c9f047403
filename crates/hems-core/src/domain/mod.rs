//! Domain entities for the HEMS device tester.
//!
//! This module contains pure state and rules with no infrastructure
//! dependencies: no sockets, no async runtime, no file system.
//!
//! # Sub-modules
//!
//! - **`peer`** – [`peer::PeerRecord`], the authoritative state of one remote
//!   device session, and the [`peer::PeerId`] key type.
//! - **`topology`** – the entity/feature/operation tree a peer exposes.
//! - **`log_buffer`** – the bounded, ordered history of trace lines.
//! - **`correlator`** – best-effort extraction of a peer id from free text.

pub mod correlator;
pub mod log_buffer;
pub mod peer;
pub mod topology;
