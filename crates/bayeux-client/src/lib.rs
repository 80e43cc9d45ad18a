//! Minimal Bayeux client.
//!
//! Speaks the long-polling connection type of the Bayeux protocol (as served by
//! CometD and Faye): handshake, a background `/meta/connect` loop, channel
//! subscriptions with acknowledgment, and teardown. A single [`Extension`] can
//! be attached per client to rewrite outbound and inbound messages.

pub mod client;
pub mod error;
pub mod extension;
pub mod message;
pub mod transport;

pub use client::{Client, ClientOptions, CloseReason, MessageCallback};
pub use error::BayeuxError;
pub use extension::Extension;
pub use message::{Advice, Message, Reconnect};
pub use transport::{LongPollingTransport, Transport};
