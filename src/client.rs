//! HTTP client with attestation tokens and dynamic pinning
//!
//! Every request made through [`AttestedClient`]:
//! 1. Fetches a token bound to the request's origin (which also records the
//!    destination's leaf certificate once per origin, not once per path)
//! 2. Attaches it as the `Approov-Token` header, or `NOTOKEN` if the fetch
//!    failed so the backend can tell "no token" from "header stripped"
//! 3. Connects through a TLS stack that only accepts the recorded leaf
//!    certificate for that host

use reqwest::{Method, RequestBuilder, Response};
use tracing::warn;
use url::Url;

use crate::error::Result;
use crate::session::AttestationSession;
use crate::tls;

/// Header carrying the attestation token
pub const TOKEN_HEADER: &str = "Approov-Token";

/// Header value sent when no token could be fetched
pub const NO_TOKEN: &str = "NOTOKEN";

/// HTTP client for backends protected by attestation tokens
pub struct AttestedClient<'a> {
    session: &'a AttestationSession,

    /// Pinned against the session's certificate cache
    http: reqwest::Client,
}

impl<'a> AttestedClient<'a> {
    /// Create a client for `session`; the session must be initialised before
    /// requests can carry real tokens
    pub fn new(session: &'a AttestationSession) -> Result<Self> {
        let http = tls::create_pinned_client(session.certificate_cache())?;
        Ok(Self { session, http })
    }

    /// Build a request to `url` carrying a fresh token
    pub async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let binding = token_binding(url);
        let token = self.session.fetch_token_async(Some(&binding)).await;
        let value = if token.is_success() {
            token.value
        } else {
            warn!(url, "token fetch failed, sending {}", NO_TOKEN);
            NO_TOKEN.to_string()
        };

        self.http.request(method, url).header(TOKEN_HEADER, value)
    }

    /// GET `url` with a fresh token
    pub async fn get(&self, url: &str) -> Result<Response> {
        Ok(self.request(Method::GET, url).await.send().await?)
    }

    /// POST a JSON body to `url` with a fresh token
    pub async fn post_json<T: serde::Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        Ok(self.request(Method::POST, url).await.json(body).send().await?)
    }
}

/// `scheme://host[:port]/` for `url`, or `url` itself if it has no such origin
fn token_binding(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.origin().is_tuple() => {
            format!("{}/", parsed.origin().ascii_serialization())
        }
        _ => url.to_string(),
    }
}
