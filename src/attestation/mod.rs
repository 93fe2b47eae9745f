//! Token fetching
//!
//! A fetch runs two things side by side:
//!
//! - the attestation exchange with the service, trying the primary endpoint
//!   and then, only if the primary could not be reached, the failover endpoint
//! - a TLS handshake with the destination URL (when one is given) to observe
//!   its leaf certificate
//!
//! Each network operation gets its own timeout window. Failures never escape
//! as errors: every fetch ends in a [`Token`], successful or not.

pub mod transport;
pub mod types;

// Re-export public types
pub use transport::{AttestationTransport, HttpTransport};
pub use types::{FetchResult, PayloadClaim, Token};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::AttestationRequest;
use crate::cache::CertificateCache;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::tls::CertificateProbe;

/// Performs attestation exchanges for one validated configuration
pub struct TokenFetcher {
    config: Arc<Configuration>,
    transport: Arc<dyn AttestationTransport>,
    probe: Arc<dyn CertificateProbe>,
    certs: CertificateCache,
}

impl TokenFetcher {
    /// Create a fetcher; `config` must already be validated
    pub fn new(
        config: Arc<Configuration>,
        transport: Arc<dyn AttestationTransport>,
        probe: Arc<dyn CertificateProbe>,
        certs: CertificateCache,
    ) -> Self {
        Self {
            config,
            transport,
            probe,
            certs,
        }
    }

    /// Fetch a token, optionally bound to `destination`
    ///
    /// Without a destination the token is general-purpose and not tied to
    /// any connection, which is weaker. On success with a destination whose
    /// leaf certificate was observed, the certificate is cached for it.
    pub async fn fetch(&self, destination: Option<Url>, payload: Option<PayloadClaim>) -> Token {
        let timeout = self.config.network_timeout();
        let request = AttestationRequest::new(self.config.customer_name.clone())
            .bound_to(destination.as_ref())
            .with_payload(payload.as_ref());

        let observe = async {
            match &destination {
                Some(url) => self.observe_leaf(url, timeout).await,
                None => None,
            }
        };
        let (leaf, outcome) = tokio::join!(observe, self.exchange(&request, timeout));

        match outcome {
            Ok(value) => {
                if let (Some(url), Some(der)) = (&destination, leaf) {
                    self.certs.put(url.clone(), der);
                }
                info!(
                    destination = destination.as_ref().map(Url::as_str),
                    "attestation token issued"
                );
                Token::success(value, destination, payload)
            }
            Err(e) => {
                warn!(
                    destination = destination.as_ref().map(Url::as_str),
                    reason = %e,
                    "attestation token fetch failed"
                );
                Token::failed(destination, payload)
            }
        }
    }

    /// Primary, then one failover attempt on network-level failure
    async fn exchange(&self, request: &AttestationRequest, timeout: Duration) -> Result<String> {
        let primary = self
            .config
            .attestation_url
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("attestation URL is missing".into()))?;

        match self.attempt(primary, request, timeout).await {
            Err(e) if e.is_retryable() => match &self.config.failover_url {
                Some(failover) => {
                    warn!(endpoint = %primary, reason = %e, "primary unreachable, trying failover");
                    self.attempt(failover, request, timeout).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    async fn attempt(
        &self,
        endpoint: &Url,
        request: &AttestationRequest,
        timeout: Duration,
    ) -> Result<String> {
        debug!(endpoint = %endpoint, "attestation attempt");
        match tokio::time::timeout(timeout, self.transport.exchange(endpoint, request)).await {
            Ok(response) => response?.into_token(),
            Err(_) => Err(Error::NetworkFailure(format!(
                "{} timed out after {:?}",
                endpoint, timeout
            ))),
        }
    }

    async fn observe_leaf(&self, url: &Url, timeout: Duration) -> Option<Vec<u8>> {
        match tokio::time::timeout(timeout, self.probe.leaf_certificate(url)).await {
            Ok(Ok(der)) => Some(der),
            Ok(Err(e)) => {
                debug!(destination = %url, reason = %e, "leaf certificate not observed");
                None
            }
            Err(_) => {
                debug!(destination = %url, "leaf certificate probe timed out");
                None
            }
        }
    }
}
