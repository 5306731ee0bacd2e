use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short, non-reversible tag for a bearer token, safe to put in logs.
pub fn token_hint(token: &str) -> String {
    sha256_hex(token)[..8].to_string()
}
