//! In-process transport and probe doubles for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use crate::api::{AttestationRequest, AttestationResponse};
use crate::attestation::AttestationTransport;
use crate::error::{Error, Result};
use crate::tls::CertificateProbe;

/// Scripted behaviour of one endpoint
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Token(&'static str),
    Reject,
    Unreachable,
    Hang,
}

#[derive(Default)]
pub struct MockTransport {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, AttestationRequest)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, endpoint: &str, reply: Reply) -> Self {
        self.replies.insert(endpoint.to_string(), reply);
        self
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|(e, _)| e == endpoint).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_request(&self) -> Option<AttestationRequest> {
        self.calls.lock().last().map(|(_, request)| request.clone())
    }
}

#[async_trait]
impl AttestationTransport for MockTransport {
    async fn exchange(
        &self,
        endpoint: &Url,
        request: &AttestationRequest,
    ) -> Result<AttestationResponse> {
        self.calls
            .lock()
            .push((endpoint.as_str().to_string(), request.clone()));

        match self.replies.get(endpoint.as_str()).copied() {
            Some(Reply::Token(token)) => Ok(AttestationResponse::ok(token)),
            Some(Reply::Reject) => Ok(AttestationResponse::rejected("integrity check failed")),
            Some(Reply::Hang) => pending().await,
            Some(Reply::Unreachable) | None => {
                Err(Error::NetworkFailure(format!("{} unreachable", endpoint)))
            }
        }
    }
}

#[derive(Default)]
pub struct MockProbe {
    certificates: HashMap<String, Vec<u8>>,
    hang: bool,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn certificate(mut self, host: &str, der: Vec<u8>) -> Self {
        self.certificates.insert(host.to_string(), der);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateProbe for MockProbe {
    async fn leaf_certificate(&self, url: &Url) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            return pending().await;
        }
        url.host_str()
            .and_then(|host| self.certificates.get(host).cloned())
            .ok_or_else(|| Error::Tls("No peer certificates".into()))
    }
}
