//! # attestee
//!
//! Client-side manager for app attestation tokens.
//!
//! An attestation service checks that the running app and device meet its
//! integrity requirements and, if they do, issues a short-lived token. Backends
//! accept requests only when they carry a valid token. This crate handles the
//! client half:
//!
//! - **Token fetching** against a primary attestation endpoint, with one
//!   failover attempt when the primary is unreachable
//! - **Connection binding**: a token can be bound to the destination URL it
//!   will be presented to
//! - **Dynamic pinning**: the TLS leaf certificate of each attested
//!   destination is recorded, and [`AttestedClient`] refuses connections that
//!   present any other certificate
//! - **Payload claims**: an arbitrary value can be hashed into the next token
//! - **Web view bridge**: embedded pages can request tokens from script
//!
//! Fetch failures are never errors. Every fetch produces a [`Token`] whose
//! [`FetchResult`] says whether it succeeded.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attestee::{AttestationSession, AttestedClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = AttestationSession::shared().ok_or("attestation unavailable")?;
//!
//!     let config = session.create_default_config().with_customer_name("acme");
//!     session.initialise(&config)?;
//!
//!     // Token bound to the backend, leaf certificate recorded for pinning
//!     let token = session.fetch_token_async(Some("https://api.acme.example/shapes")).await;
//!     if token.is_success() {
//!         let pinned = session.get_cert("https://api.acme.example/shapes");
//!         println!("pinned {} bytes", pinned.map_or(0, |c| c.len()));
//!     }
//!
//!     // Or let the client do all of it per request
//!     let client = AttestedClient::new(session)?;
//!     let response = client.get("https://api.acme.example/shapes").await?;
//!     println!("{}", response.status());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod attestation;
pub mod bridge;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod tls;

#[cfg(test)]
mod testing;

pub use attestation::{FetchResult, PayloadClaim, Token, TokenFetcher};
pub use bridge::{BridgeCall, ScriptContext, ViewHandle, WebBridge};
pub use cache::{CertificateCache, PinnedCertificate};
pub use client::AttestedClient;
pub use config::Configuration;
pub use error::{Error, Result};
pub use session::AttestationSession;
