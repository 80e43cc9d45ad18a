// Inbound webhook security
//
// The signature verifier is a pure function over the parsed body; the HTTP
// handler that uses it lives in `server::handlers::push`.

pub mod signature;

pub use signature::{SignatureVerifier, canonical_json, parse_signature_header, sign, verify};
