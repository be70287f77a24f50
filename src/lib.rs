//! Rust client for the VK Streaming API.
//!
//! The crate is organized around a [`VkStream`] session:
//! - `auth`: exchanges a service token for the stream endpoint and key.
//! - `rules`: lists, adds and deletes the session's filter rules.
//! - `stream`: realtime websocket receive loop with explicit start/stop.
//! - `retry`: opt-in retry and timeout helpers for callers.
//!
//! ```no_run
//! # async fn run() -> Result<(), vkstream_sdk::VkError> {
//! use secrecy::SecretString;
//! use vkstream_sdk::VkStream;
//!
//! let token = SecretString::new("service-token".to_string());
//! let session = VkStream::with_token(&token).await?;
//! session.add_rule("golang -rust", "go").await?;
//!
//! let mut events = session.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{} {:?}", event.event_url, event.tags);
//! }
//! # Ok(())
//! # }
//! ```

/// Credential bootstrap.
pub mod auth;
/// Error types shared by all operations.
pub mod error;
/// Retry and timeout helpers for callers.
pub mod retry;
/// Filter rule management.
pub mod rules;
/// Session type and transport options.
pub mod session;
/// Realtime stream types and lifecycle.
pub mod stream;

pub use auth::Credentials;
pub use error::{ApiError, VkError};
pub use rules::{ClearRulesError, ClearedRules, Rule};
pub use session::{ClientDefaults, ClientOptions, VkStream};
pub use stream::{Event, EventStream, ListenerState, StreamEnd, StreamStats};
