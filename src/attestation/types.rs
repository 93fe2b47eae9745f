//! Core types for token fetching

use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Outcome of a token fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    Success,
    Failed,
}

/// Hashed payload claim carried by the next token fetch
///
/// Only the SHA-256 digest of the caller's value is kept; the service
/// receives it base64-encoded as the `pay` claim.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PayloadClaim([u8; 32]);

impl PayloadClaim {
    /// Hash `value` into a claim
    pub fn from_value(value: &str) -> Self {
        Self(Sha256::digest(value.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Standard base64 of the digest, as sent to the service
    pub fn encoded(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

impl fmt::Debug for PayloadClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PayloadClaim").field(&self.encoded()).finish()
    }
}

/// Result of a token fetch
///
/// Tokens are short-lived bearer strings. Do not store them: fetch a fresh
/// one for each request that needs it.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub fetch_result: FetchResult,

    /// Token string; empty when the fetch failed
    pub value: String,

    /// Destination the token is bound to, if any
    pub issued_for: Option<Url>,

    /// Payload claim carried by the fetch that produced this token
    pub payload_claim: Option<PayloadClaim>,
}

impl Token {
    pub fn success(
        value: impl Into<String>,
        issued_for: Option<Url>,
        payload_claim: Option<PayloadClaim>,
    ) -> Self {
        Self {
            fetch_result: FetchResult::Success,
            value: value.into(),
            issued_for,
            payload_claim,
        }
    }

    pub fn failed(issued_for: Option<Url>, payload_claim: Option<PayloadClaim>) -> Self {
        Self {
            fetch_result: FetchResult::Failed,
            value: String::new(),
            issued_for,
            payload_claim,
        }
    }

    pub fn is_success(&self) -> bool {
        self.fetch_result == FetchResult::Success
    }
}

// Keeps token strings out of logs
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("fetch_result", &self.fetch_result)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("issued_for", &self.issued_for.as_ref().map(Url::as_str))
            .field("payload_claim", &self.payload_claim)
            .finish()
    }
}
