//! # hems-core
//!
//! Shared domain types and the observer protocol for the HEMS device tester.
//!
//! The tester sits next to an external protocol engine that discovers, pairs
//! with and talks to remote energy devices (wallboxes, heat pumps, inverters).
//! Every remote device session is tracked as a *peer*, keyed by its SKI
//! (subject key identifier).  This crate holds the pieces of that picture
//! that have no I/O in them:
//!
//! - **`domain`** – the per-peer state record, the rendered device topology,
//!   the bounded log history and the heuristic that tags free-text trace
//!   lines with a peer identifier.
//!
//! - **`protocol`** – the JSON messages streamed to observers and the event
//!   vocabulary the protocol engine uses to report what happened.
//!
//! Nothing here spawns tasks or touches sockets.  The async registry,
//! fan-out and servers live in `hems-service`.

pub mod domain;
pub mod protocol;

pub use domain::correlator::IdentifierCorrelator;
pub use domain::log_buffer::{LogEntry, LogRingBuffer, Severity, DEFAULT_LOG_CAPACITY};
pub use domain::peer::{DeviceDescriptor, PeerId, PeerRecord};
pub use domain::topology::{EntityInfo, FeatureInfo, OperationInfo, TopologySnapshot};
pub use protocol::events::{AccessError, CapabilityEvent, EventPayload, SessionEvent};
pub use protocol::messages::{ObserverMessage, PeerSummary, UsecaseState};
