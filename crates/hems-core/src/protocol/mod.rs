//! Protocol module: the engine event vocabulary and the observer messages.
//!
//! ```text
//! protocol engine ──(events)──► registry / router ──(messages)──► observers
//! ```

pub mod events;
pub mod messages;

pub use events::{AccessError, CapabilityEvent, EventPayload, SessionEvent};
pub use messages::{ObserverMessage, PeerSummary, UsecaseState};
