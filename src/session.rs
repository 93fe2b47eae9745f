//! Attestation session
//!
//! The session owns everything that lives for the whole process: the active
//! configuration, the pending payload claim, the certificate cache, the web
//! view registry, and a small runtime that token fetches run on.
//!
//! Hosts normally use the process-wide instance from
//! [`AttestationSession::shared`]. Separate sessions can be built with
//! [`AttestationSession::new`] where an explicit context is preferable.
//!
//! Lifecycle: a session starts uninitialised and every fetch fails (without
//! touching the network) until [`initialise`](AttestationSession::initialise)
//! accepts a configuration. Calling `initialise` again replaces the
//! configuration. There is no teardown.

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::attestation::{AttestationTransport, HttpTransport, PayloadClaim, Token, TokenFetcher};
use crate::bridge::{BridgeCall, ScriptContext, ViewHandle, WebBridge};
use crate::cache::CertificateCache;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::tls::{CertificateProbe, TlsProbe};

/// Worker threads for the fetch runtime
const FETCH_WORKERS: usize = 2;

static SHARED: OnceLock<Option<AttestationSession>> = OnceLock::new();

enum SessionState {
    Uninitialized,
    Ready(Arc<TokenFetcher>),
}

/// Client-side attestation token manager
pub struct AttestationSession {
    state: RwLock<SessionState>,
    pending_payload: Mutex<Option<PayloadClaim>>,
    current_token: Arc<Mutex<String>>,
    certs: CertificateCache,
    bridge: WebBridge,
    transport: Arc<dyn AttestationTransport>,
    probe: Arc<dyn CertificateProbe>,
    runtime: Option<Runtime>,
    executor: Handle,
}

impl AttestationSession {
    /// The process-wide session, created on first use
    ///
    /// `None` only if the session's runtime or TLS stack could not be set up.
    pub fn shared() -> Option<&'static AttestationSession> {
        SHARED
            .get_or_init(|| match Self::new() {
                Ok(session) => Some(session),
                Err(e) => {
                    error!(reason = %e, "failed to create shared attestation session");
                    None
                }
            })
            .as_ref()
    }

    /// A standalone session using HTTPS to reach the attestation service
    pub fn new() -> Result<Self> {
        Self::with_transport(Arc::new(HttpTransport::new()?), Arc::new(TlsProbe))
    }

    /// A standalone session with custom transport and certificate probe
    pub fn with_transport(
        transport: Arc<dyn AttestationTransport>,
        probe: Arc<dyn CertificateProbe>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(FETCH_WORKERS)
            .thread_name("attestee-fetch")
            .enable_all()
            .build()?;
        let executor = runtime.handle().clone();

        Ok(Self {
            state: RwLock::new(SessionState::Uninitialized),
            pending_payload: Mutex::new(None),
            current_token: Arc::new(Mutex::new(String::new())),
            certs: CertificateCache::new(),
            bridge: WebBridge::new(),
            transport,
            probe,
            runtime: Some(runtime),
            executor,
        })
    }

    /// A copy of the default configuration, free to modify before
    /// [`initialise`](Self::initialise)
    pub fn create_default_config(&self) -> Configuration {
        Configuration::default()
    }

    /// Validate `config` and make the session ready to fetch tokens
    ///
    /// The session keeps its own copy of `config`. On error the previous
    /// state (uninitialised, or the previous configuration) is kept.
    pub fn initialise(&self, config: &Configuration) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(reason = %e, "attestation configuration rejected");
            return Err(e);
        }

        let fetcher = TokenFetcher::new(
            Arc::new(config.clone()),
            self.transport.clone(),
            self.probe.clone(),
            self.certs.clone(),
        );

        let mut state = self.state.write();
        let reinitialised = matches!(*state, SessionState::Ready(_));
        *state = SessionState::Ready(Arc::new(fetcher));

        info!(
            customer = %config.customer_name,
            primary = config.attestation_url.as_ref().map(Url::as_str),
            failover = config.failover_url.as_ref().map(Url::as_str),
            reinitialised,
            "attestation session ready"
        );
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        matches!(*self.state.read(), SessionState::Ready(_))
    }

    /// Add a hashed payload claim to the next token fetch
    ///
    /// Only the SHA-256 of `value` is kept. A later call replaces a claim
    /// that has not been used yet; the claim is consumed by the next fetch.
    pub fn set_payload(&self, value: &str) {
        *self.pending_payload.lock() = Some(PayloadClaim::from_value(value));
        debug!("payload claim set for next token fetch");
    }

    /// Fetch a token and pass it to `callback`
    ///
    /// `url` is the destination the token will be presented to (a full https
    /// URL, or a bare host name). Without it the token is not bound to any
    /// connection.
    ///
    /// `callback` runs exactly once, on a session worker thread, never
    /// before this method returns. Failures arrive as a
    /// [`FetchResult::Failed`](crate::FetchResult::Failed) token.
    pub fn fetch_token<F>(&self, url: Option<&str>, callback: F)
    where
        F: FnOnce(Token) + Send + 'static,
    {
        let destination = url.map(parse_destination).transpose();
        let requested = destination.as_ref().ok().cloned().flatten();
        let prepared = destination.and_then(|destination| self.prepare(destination));
        let current_token = self.current_token.clone();

        self.executor.spawn(async move {
            let token = match prepared {
                Ok((fetcher, destination, payload)) => fetcher.fetch(destination, payload).await,
                Err(e) => {
                    warn!(reason = %e, "token fetch not attempted");
                    Token::failed(requested, None)
                }
            };
            if token.is_success() {
                *current_token.lock() = token.value.clone();
            }
            callback(token);
        });
    }

    /// Fetch a token, awaiting the result
    pub async fn fetch_token_async(&self, url: Option<&str>) -> Token {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.fetch_token(url, move |token| {
            let _ = tx.send(token);
        });
        rx.await.unwrap_or_else(|_| Token::failed(None, None))
    }

    /// Fetch a token, blocking the calling thread
    ///
    /// May block for up to two network timeouts. Do not call this from a
    /// thread that must stay responsive, such as a UI thread.
    pub fn fetch_token_sync(&self, url: Option<&str>) -> Token {
        let (tx, rx) = std::sync::mpsc::channel();
        self.fetch_token(url, move |token| {
            let _ = tx.send(token);
        });
        rx.recv().unwrap_or_else(|_| Token::failed(None, None))
    }

    /// Snapshot of what a fetch needs; takes the pending payload claim
    fn prepare(
        &self,
        destination: Option<Url>,
    ) -> Result<(Arc<TokenFetcher>, Option<Url>, Option<PayloadClaim>)> {
        let fetcher = match &*self.state.read() {
            SessionState::Ready(fetcher) => fetcher.clone(),
            SessionState::Uninitialized => return Err(Error::NotInitialized),
        };
        let payload = self.pending_payload.lock().take();
        Ok((fetcher, destination, payload))
    }

    /// The most recent successfully fetched token, or an empty string
    ///
    /// Tokens expire quickly; prefer fetching a fresh one.
    pub fn current_token(&self) -> String {
        self.current_token.lock().clone()
    }

    /// DER leaf certificate captured by the last successful fetch for `url`
    pub fn get_cert(&self, url: &str) -> Option<Vec<u8>> {
        let url = parse_destination(url).ok()?;
        self.certs.get(&url)
    }

    /// Forget every captured certificate
    pub fn clear_certs(&self) {
        self.certs.clear();
        debug!("certificate cache cleared");
    }

    /// Shared handle to the certificate cache, for pinned clients
    pub fn certificate_cache(&self) -> CertificateCache {
        self.certs.clone()
    }

    /// Attach the script bridge to a web view
    ///
    /// Returns `false` if the view was already registered.
    pub fn register_web_view(&self, view: ViewHandle, context: &Arc<dyn ScriptContext>) -> bool {
        self.bridge.register(view, context)
    }

    pub fn unregister_web_view(&self, view: ViewHandle) {
        self.bridge.unregister(view);
    }

    /// Handle a message posted by a page's bridge script
    pub fn handle_script_message(&self, view: ViewHandle, message: &str) -> Result<()> {
        let call = BridgeCall::parse(message)?;
        self.dispatch_bridge_call(view, call);
        Ok(())
    }

    /// Fetch an unbound token for a page and report it to its callbacks
    ///
    /// Calls from views that are not registered are ignored.
    pub fn dispatch_bridge_call(&self, view: ViewHandle, call: BridgeCall) {
        if !self.bridge.is_registered(view) {
            debug!(?view, "bridge call from unregistered web view ignored");
            return;
        }
        let bridge = self.bridge.clone();
        self.fetch_token(None, move |token| bridge.complete(view, &call, &token));
    }
}

impl Drop for AttestationSession {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Parse a destination, accepting a bare host as `https://<host>/`
fn parse_destination(raw: &str) -> Result<Url> {
    let url = if raw.contains("://") {
        Url::parse(raw)?
    } else {
        Url::parse(&format!("https://{}/", raw))?
    };

    if url.scheme() != "https" {
        return Err(Error::InvalidUrl(format!(
            "only https destinations can be attested: {}",
            raw
        )));
    }
    Ok(url)
}
