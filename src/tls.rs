//! TLS leaf certificate capture and dynamic pinning
//!
//! A successful token fetch for a URL records the leaf certificate the
//! destination presented. Pinned clients then only complete handshakes whose
//! leaf certificate is byte-identical to the recorded one.

use async_trait::async_trait;
use der::{Decode, Encode};
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use x509_cert::Certificate;

use crate::cache::CertificateCache;
use crate::error::{Error, Result};

/// Compute SHA256 fingerprint of a DER certificate's public key
///
/// This hashes the full SPKI (SubjectPublicKeyInfo) in DER format, which
/// matches how OpenSSL computes public key fingerprints.
pub fn spki_fingerprint(cert_der: &[u8]) -> Result<String> {
    let cert = Certificate::from_der(cert_der)
        .map_err(|e| Error::Tls(format!("Failed to parse certificate: {}", e)))?;

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Tls(format!("Failed to encode SPKI: {}", e)))?;

    Ok(hex::encode(Sha256::digest(&spki_der)))
}

fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn root_store() -> rustls::RootCertStore {
    rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Observes the TLS leaf certificate a destination presents
#[async_trait]
pub trait CertificateProbe: Send + Sync {
    /// DER bytes of the leaf certificate presented by `url`'s server
    async fn leaf_certificate(&self, url: &Url) -> Result<Vec<u8>>;
}

/// Probe that performs a real TLS handshake with WebPKI validation
#[derive(Debug, Default, Clone)]
pub struct TlsProbe;

#[async_trait]
impl CertificateProbe for TlsProbe {
    async fn leaf_certificate(&self, url: &Url) -> Result<Vec<u8>> {
        use rustls::pki_types::ServerName;
        use tokio::net::TcpStream;
        use tokio_rustls::TlsConnector;

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{} has no host", url)))?;
        let port = url.port_or_known_default().unwrap_or(443);

        install_crypto_provider();

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Tls(format!("Failed to connect: {}", e)))?;

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store())
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls("Invalid server name".into()))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

        let (_, conn) = tls_stream.get_ref();
        let leaf = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| Error::Tls("No peer certificates".into()))?;

        debug!(host, "observed leaf certificate");
        Ok(leaf.as_ref().to_vec())
    }
}

/// Certificate verifier that pins each host to the certificate recorded by
/// its last successful token fetch
///
/// This verifier:
/// 1. First validates the certificate chain normally (CA signatures, expiry, etc.)
/// 2. Then requires the leaf to equal the cached certificate for the host
///
/// A mismatch, or a cached entry that no longer parses, flushes the whole
/// cache so the next token fetch records fresh certificates.
#[derive(Debug)]
pub struct DynamicPinVerifier {
    certs: CertificateCache,
    inner: Arc<rustls::client::WebPkiServerVerifier>,
}

impl DynamicPinVerifier {
    pub fn new(certs: CertificateCache) -> Result<Self> {
        let inner = rustls::client::WebPkiServerVerifier::builder(Arc::new(root_store()))
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build verifier: {}", e)))?;

        Ok(Self { certs, inner })
    }

    /// Compare `end_entity` with the certificate cached for `host`
    fn check_pin(&self, host: &str, end_entity: &[u8]) -> std::result::Result<(), rustls::Error> {
        let pinned = self.certs.find_by_host(host).ok_or_else(|| {
            rustls::Error::General(format!("No attested certificate for {}", host))
        })?;

        if Certificate::from_der(&pinned.der).is_err() {
            warn!(host, "cached certificate is unparsable, flushing certificate cache");
            self.certs.clear();
            return Err(rustls::Error::General(format!(
                "Cached certificate for {} is invalid",
                host
            )));
        }

        if pinned.der.as_slice() != end_entity {
            warn!(host, "leaf certificate does not match pin, flushing certificate cache");
            self.certs.clear();
            return Err(rustls::Error::General(format!(
                "Certificate pin mismatch for {}",
                host
            )));
        }

        debug!(host, "pinning check passed");
        Ok(())
    }
}

impl rustls::client::danger::ServerCertVerifier for DynamicPinVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &rustls::pki_types::ServerName<'_>,
        ocsp_response: &[u8],
        now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        self.check_pin(&server_name.to_str(), end_entity.as_ref())?;

        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Create a reqwest client pinned against `certs`
///
/// Connections to a host without a cached certificate are refused, so a
/// token fetch for the destination must succeed before the client is used.
pub fn create_pinned_client(certs: CertificateCache) -> Result<reqwest::Client> {
    install_crypto_provider();

    let verifier = DynamicPinVerifier::new(certs)?;

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build HTTP client: {}", e)))
}
