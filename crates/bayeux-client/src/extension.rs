use crate::message::Message;

/// Hook applied to every message the client sends or receives.
///
/// A client carries at most one extension. `outgoing` runs on each message
/// right before it is handed to the transport, including the subscribe
/// messages replayed after a re-handshake.
pub trait Extension: Send + Sync {
    fn outgoing(&self, message: Message) -> Message;

    fn incoming(&self, message: Message) -> Message {
        message
    }
}
