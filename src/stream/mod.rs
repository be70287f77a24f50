//! Realtime stream modules.
//!
//! - `client`: websocket dial and the receive loop.
//! - `proto`: envelope and event types pushed by the stream service.
//! - `listener`: start/stop lifecycle and the consumer-facing event stream.

/// Websocket connection and receive loop.
pub(crate) mod client;
/// Start/stop lifecycle and event delivery.
pub mod listener;
/// Stream protocol messages.
pub mod proto;

pub use listener::{EventStream, ListenerState, StreamEnd, StreamStats};
pub use proto::{Author, Event, EventAction, EventId, EventKind};
