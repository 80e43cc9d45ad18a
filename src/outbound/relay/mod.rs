// Downstream fan-out
//
//   event_relay    – per-target worker queues, failure isolation
//   http_forwarder – JSON POST delivery to one target URL

pub mod event_relay;
pub mod http_forwarder;

pub use event_relay::EventRelay;
pub use http_forwarder::HttpForwarder;
