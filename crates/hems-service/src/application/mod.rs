//! Application layer: the registry, the fan-out and the use cases that
//! drive them.
//!
//! | Module          | Responsibility                                        |
//! |-----------------|-------------------------------------------------------|
//! | `peer_registry` | one record per SKI, global use-case enablement        |
//! | `subscribers`   | live observer queues, eviction on failed delivery     |
//! | `broadcaster`   | snapshots, publishing, the engine log sink            |
//! | `event_router`  | engine events → record updates → one publish          |
//! | `commands`      | outbound capability writes with aggregated failures   |
//!
//! Nothing here performs network I/O; the infrastructure layer adapts these
//! types to WebSocket, HTTP and the protocol engine.

pub mod broadcaster;
pub mod commands;
pub mod event_router;
pub mod peer_registry;
pub mod subscribers;

pub use broadcaster::{Broadcaster, EchoLevels};
pub use commands::{
    CommandError, CommandService, EngineError, EntityFailure, EntityRef, ProtocolEngine,
    WriteReport,
};
pub use event_router::EventRouter;
pub use peer_registry::{lock_record, PeerHandle, PeerRegistry};
pub use subscribers::{Envelope, SubscriberSet, Subscription, DEFAULT_QUEUE_DEPTH};
