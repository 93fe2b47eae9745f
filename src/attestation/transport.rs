//! Transport to the attestation service

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::api::{AttestationRequest, AttestationResponse};
use crate::error::{Error, Result};

/// One request/response exchange with an attestation endpoint
///
/// Implementations must report anything that stops a verdict from arriving
/// (connection errors, unavailable service, garbled replies) as
/// [`Error::NetworkFailure`], and an explicit denial as
/// [`Error::AttestationRejected`]. The fetcher relies on that split to decide
/// whether the failover endpoint is worth trying. Timeouts are applied by the
/// caller.
#[async_trait]
pub trait AttestationTransport: Send + Sync {
    async fn exchange(
        &self,
        endpoint: &Url,
        request: &AttestationRequest,
    ) -> Result<AttestationResponse>;
}

/// HTTPS JSON transport backed by reqwest + rustls
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(config)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AttestationTransport for HttpTransport {
    async fn exchange(
        &self,
        endpoint: &Url,
        request: &AttestationRequest,
    ) -> Result<AttestationResponse> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AttestationRejected(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            return Err(Error::NetworkFailure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        response
            .json::<AttestationResponse>()
            .await
            .map_err(|e| Error::NetworkFailure(format!("malformed service reply: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::net::TcpListener;

    fn localhost_binding_permitted() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn endpoint(server: &Server) -> Url {
        Url::parse(&format!("{}/attest", server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_success() {
        if !localhost_binding_permitted() {
            return;
        }
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/attest")
            .match_body(Matcher::PartialJsonString(r#"{"customer":"acme"}"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"ok","token":"tok123"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .exchange(&endpoint(&server), &AttestationRequest::new("acme"))
            .await
            .unwrap();
        assert_eq!(response.into_token().unwrap(), "tok123");
    }

    #[tokio::test]
    async fn test_forbidden_is_rejection() {
        if !localhost_binding_permitted() {
            return;
        }
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/attest")
            .with_status(403)
            .with_body("integrity check failed")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .exchange(&endpoint(&server), &AttestationRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttestationRejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unavailable_is_network_failure() {
        if !localhost_binding_permitted() {
            return;
        }
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/attest")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .exchange(&endpoint(&server), &AttestationRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_network_failure() {
        if !localhost_binding_permitted() {
            return;
        }
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/attest")
            .with_status(200)
            .with_body("<html>captive portal</html>")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .exchange(&endpoint(&server), &AttestationRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        if !localhost_binding_permitted() {
            return;
        }
        // Bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = Url::parse(&format!("http://127.0.0.1:{}/attest", port)).unwrap();

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .exchange(&url, &AttestationRequest::new("acme"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
