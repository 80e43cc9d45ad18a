use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// HMAC-SHA256 verifier for webhook bodies
///
/// The digest covers the canonical JSON form of the body (compact, object
/// keys sorted), so the result does not depend on how the sender spaced or
/// ordered its payload.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    /// New verifier; without a secret every signature is rejected
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Check `signature` against the configured secret
    pub fn verify(&self, body: &Value, signature: Option<&str>) -> bool {
        verify(body, signature, self.secret.as_deref())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Canonical byte serialization of a JSON body.
pub fn canonical_json(body: &Value) -> Vec<u8> {
    // serde_json's default map is ordered by key, and `Value` always serializes.
    serde_json::to_vec(body).unwrap_or_default()
}

/// Hex-encoded HMAC-SHA256 of the canonical body.
pub fn sign(body: &Value, secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
    };

    mac.update(&canonical_json(body));
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `signature` over `body` with `secret`; false on any missing input.
pub fn verify(body: &Value, signature: Option<&str>, secret: Option<&str>) -> bool {
    let (Some(signature), Some(secret)) = (signature, secret) else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }

    let provided = parse_signature_header(signature).to_ascii_lowercase();
    let expected = sign(body, secret);

    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Strip an optional `sha256=` prefix from a signature header value
pub fn parse_signature_header(header: &str) -> &str {
    let header = header.trim();
    match header.get(..SIGNATURE_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SIGNATURE_PREFIX) => {
            &header[SIGNATURE_PREFIX.len()..]
        }
        _ => header,
    }
}
