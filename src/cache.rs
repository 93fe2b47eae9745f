//! Cache of TLS leaf certificates observed on attested connections

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::error::Result;
use crate::tls;

/// Leaf certificate captured for a destination URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedCertificate {
    pub url: Url,
    /// DER encoding of the X.509 leaf certificate
    pub der: Vec<u8>,
}

impl PinnedCertificate {
    /// Hex SHA-256 of the certificate's SubjectPublicKeyInfo
    pub fn spki_fingerprint(&self) -> Result<String> {
        tls::spki_fingerprint(&self.der)
    }
}

#[derive(Debug)]
struct Slot {
    cert: PinnedCertificate,
    /// Write sequence number, higher is newer
    written: u64,
}

#[derive(Debug, Default)]
struct Entries {
    by_url: HashMap<Url, Slot>,
    writes: u64,
}

/// Per-URL certificate store shared between the session, the fetcher and
/// pinned HTTP clients
///
/// Entries are only written after a successful token fetch and are only
/// removed all at once by [`clear`](Self::clear).
#[derive(Debug, Clone, Default)]
pub struct CertificateCache {
    entries: Arc<Mutex<Entries>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `der` for `url`, replacing any previous entry
    pub fn put(&self, url: Url, der: Vec<u8>) {
        let mut entries = self.entries.lock();
        entries.writes += 1;
        let slot = Slot {
            cert: PinnedCertificate { url: url.clone(), der },
            written: entries.writes,
        };
        entries.by_url.insert(url, slot);
    }

    /// Certificate for exactly this URL
    pub fn get(&self, url: &Url) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .by_url
            .get(url)
            .map(|slot| slot.cert.der.clone())
    }

    /// Most recently written certificate for a URL on `host`
    ///
    /// TLS verification only sees a server name, so pinning looks entries up
    /// by host. Older entries for other paths on the host may predate a
    /// certificate rotation.
    pub fn find_by_host(&self, host: &str) -> Option<PinnedCertificate> {
        self.entries
            .lock()
            .by_url
            .values()
            .filter(|slot| {
                slot.cert
                    .url
                    .host_str()
                    .is_some_and(|h| h.eq_ignore_ascii_case(host))
            })
            .max_by_key(|slot| slot.written)
            .map(|slot| slot.cert.clone())
    }

    pub fn clear(&self) {
        self.entries.lock().by_url.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().by_url.is_empty()
    }
}
