//! Attestation service wire types
//!
//! The service protocol itself is opaque; this is the JSON envelope the
//! client posts to the attestation endpoint and the reply it expects back.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::attestation::types::PayloadClaim;
use crate::error::{Error, Result};

/// Client identifier sent with every request
pub const SDK_IDENTIFIER: &str = concat!("attestee/", env!("CARGO_PKG_VERSION"));

/// Attestation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationRequest {
    pub customer: String,

    /// Fresh per request
    pub nonce: String,

    pub sdk: String,

    /// Destination the token will be bound to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Base64 SHA-256 payload claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay: Option<String>,
}

impl AttestationRequest {
    pub fn new(customer: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            nonce: uuid::Uuid::new_v4().to_string(),
            sdk: SDK_IDENTIFIER.to_string(),
            destination: None,
            pay: None,
        }
    }

    pub fn bound_to(mut self, destination: Option<&Url>) -> Self {
        self.destination = destination.map(|url| url.as_str().to_string());
        self
    }

    pub fn with_payload(mut self, claim: Option<&PayloadClaim>) -> Self {
        self.pay = claim.map(PayloadClaim::encoded);
        self
    }
}

/// Service verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Ok,
    Rejected,
}

/// Attestation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationResponse {
    pub status: ServiceStatus,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,
}

impl AttestationResponse {
    pub fn ok(token: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Ok,
            token: Some(token.into()),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Rejected,
            token: None,
            reason: Some(reason.into()),
        }
    }

    /// Extract the issued token
    ///
    /// An `ok` reply without a token is treated as a broken reply from that
    /// endpoint, so the failover still gets a chance.
    pub fn into_token(self) -> Result<String> {
        match self.status {
            ServiceStatus::Ok => match self.token {
                Some(token) if !token.is_empty() => Ok(token),
                _ => Err(Error::NetworkFailure("service reply carried no token".into())),
            },
            ServiceStatus::Rejected => Err(Error::AttestationRejected(
                self.reason.unwrap_or_else(|| "no reason given".into()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_absent_fields() {
        let request = AttestationRequest::new("acme");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["customer"], "acme");
        assert!(json["sdk"].as_str().unwrap().starts_with("attestee/"));
        assert!(json.get("destination").is_none());
        assert!(json.get("pay").is_none());
    }

    #[test]
    fn test_request_binding_and_payload() {
        let url = Url::parse("https://service.example/x").unwrap();
        let claim = PayloadClaim::from_value("abc");
        let request = AttestationRequest::new("acme")
            .bound_to(Some(&url))
            .with_payload(Some(&claim));

        assert_eq!(request.destination.as_deref(), Some("https://service.example/x"));
        assert_eq!(request.pay, Some(claim.encoded()));
    }

    #[test]
    fn test_nonce_is_fresh() {
        let a = AttestationRequest::new("acme");
        let b = AttestationRequest::new("acme");
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_response_parsing() {
        let ok: AttestationResponse =
            serde_json::from_str(r#"{"status":"ok","token":"tok123"}"#).unwrap();
        assert_eq!(ok.into_token().unwrap(), "tok123");

        let rejected: AttestationResponse =
            serde_json::from_str(r#"{"status":"rejected","reason":"integrity"}"#).unwrap();
        assert!(matches!(rejected.into_token(), Err(Error::AttestationRejected(r)) if r == "integrity"));
    }

    #[test]
    fn test_ok_without_token_is_retryable() {
        let empty: AttestationResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        let err = empty.into_token().unwrap_err();
        assert!(err.is_retryable());
    }
}
