//! Attestation service configuration
//!
//! A [`Configuration`] is a plain value: callers start from
//! [`Configuration::default`] (or [`Configuration::from_env`]), adjust it, and
//! hand it to [`AttestationSession::initialise`](crate::AttestationSession::initialise),
//! which takes its own copy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Default customer identifier
pub const DEFAULT_CUSTOMER_NAME: &str = "default";

/// Default primary attestation endpoint
pub const DEFAULT_ATTESTATION_URL: &str = "https://attest.approov.io/v1/attest";

/// Default failover attestation endpoint
pub const DEFAULT_FAILOVER_URL: &str = "https://attest-failover.approov.io/v1/attest";

/// Default per-attempt network timeout, in seconds
pub const DEFAULT_NETWORK_TIMEOUT_SECS: f64 = 10.0;

/// Environment variables read by [`Configuration::from_env`]
pub const ENV_CUSTOMER: &str = "ATTESTEE_CUSTOMER";
pub const ENV_ATTESTATION_URL: &str = "ATTESTEE_ATTESTATION_URL";
pub const ENV_FAILOVER_URL: &str = "ATTESTEE_FAILOVER_URL";
pub const ENV_NETWORK_TIMEOUT: &str = "ATTESTEE_NETWORK_TIMEOUT";

/// Configuration for the attestation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Customer identifier presented to the attestation service
    pub customer_name: String,

    /// Primary attestation endpoint (must be https)
    pub attestation_url: Option<Url>,

    /// Endpoint tried once when the primary is unreachable
    pub failover_url: Option<Url>,

    /// Timeout for each network attempt, in seconds
    pub network_timeout_secs: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            customer_name: DEFAULT_CUSTOMER_NAME.to_string(),
            attestation_url: Url::parse(DEFAULT_ATTESTATION_URL).ok(),
            failover_url: Url::parse(DEFAULT_FAILOVER_URL).ok(),
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
        }
    }
}

impl Configuration {
    /// Defaults overlaid with any `ATTESTEE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values returned by `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(customer) = lookup(ENV_CUSTOMER) {
            config.customer_name = customer;
        }
        if let Some(url) = lookup(ENV_ATTESTATION_URL) {
            config.attestation_url = Some(parse_endpoint(ENV_ATTESTATION_URL, &url)?);
        }
        if let Some(url) = lookup(ENV_FAILOVER_URL) {
            // An empty value disables failover
            config.failover_url = if url.trim().is_empty() {
                None
            } else {
                Some(parse_endpoint(ENV_FAILOVER_URL, &url)?)
            };
        }
        if let Some(timeout) = lookup(ENV_NETWORK_TIMEOUT) {
            config.network_timeout_secs = timeout.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{} is not a number: {:?}", ENV_NETWORK_TIMEOUT, timeout))
            })?;
        }

        Ok(config)
    }

    pub fn with_customer_name(mut self, name: impl Into<String>) -> Self {
        self.customer_name = name.into();
        self
    }

    pub fn with_attestation_url(mut self, url: Url) -> Self {
        self.attestation_url = Some(url);
        self
    }

    pub fn with_failover_url(mut self, url: Option<Url>) -> Self {
        self.failover_url = url;
        self
    }

    pub fn with_network_timeout_secs(mut self, secs: f64) -> Self {
        self.network_timeout_secs = secs;
        self
    }

    /// Check the configuration is usable for attestation
    ///
    /// The primary endpoint must be present and use https, and the timeout
    /// must be a finite positive number of seconds.
    pub fn validate(&self) -> Result<()> {
        let primary = self
            .attestation_url
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("attestation URL is missing".into()))?;

        if primary.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "attestation URL must use https, got {}",
                primary.scheme()
            )));
        }

        if !self.network_timeout_secs.is_finite() || self.network_timeout_secs <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "network timeout must be positive, got {}",
                self.network_timeout_secs
            )));
        }

        Ok(())
    }

    /// Per-attempt timeout
    ///
    /// Only meaningful on a validated configuration. Values too large for a
    /// [`Duration`] saturate.
    pub fn network_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.network_timeout_secs).unwrap_or(Duration::MAX)
    }
}

fn parse_endpoint(var: &str, value: &str) -> Result<Url> {
    Url::parse(value.trim())
        .map_err(|e| Error::InvalidConfig(format!("{} is not a valid URL: {}", var, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_default_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.customer_name, DEFAULT_CUSTOMER_NAME);
        assert!(config.failover_url.is_some());
        assert_eq!(config.network_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_primary_rejected() {
        let mut config = Configuration::default();
        config.attestation_url = None;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_plain_http_primary_rejected() {
        let config = Configuration::default().with_attestation_url(url("http://a.example"));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = Configuration::default().with_network_timeout_secs(secs);
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "timeout {} should be rejected",
                secs
            );
        }
    }

    #[test]
    fn test_fractional_timeout() {
        let config = Configuration::default().with_network_timeout_secs(0.25);
        assert!(config.validate().is_ok());
        assert_eq!(config.network_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = Configuration::default().with_network_timeout_secs(1e20);
        assert!(config.validate().is_ok());
        assert_eq!(config.network_timeout(), Duration::MAX);
    }

    #[test]
    fn test_lookup_overlay() {
        let vars: HashMap<&str, &str> = [
            (ENV_CUSTOMER, "acme"),
            (ENV_ATTESTATION_URL, "https://a.example/attest"),
            (ENV_FAILOVER_URL, ""),
            (ENV_NETWORK_TIMEOUT, "5"),
        ]
        .into_iter()
        .collect();

        let config = Configuration::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.customer_name, "acme");
        assert_eq!(config.attestation_url, Some(url("https://a.example/attest")));
        assert_eq!(config.failover_url, None);
        assert_eq!(config.network_timeout_secs, 5.0);
    }

    #[test]
    fn test_lookup_bad_values() {
        let bad_timeout = Configuration::from_lookup(|k| {
            (k == ENV_NETWORK_TIMEOUT).then(|| "soon".to_string())
        });
        assert!(matches!(bad_timeout, Err(Error::InvalidConfig(_))));

        let bad_url = Configuration::from_lookup(|k| {
            (k == ENV_ATTESTATION_URL).then(|| "not a url".to_string())
        });
        assert!(matches!(bad_url, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Configuration::default();
        let mut copy = original.clone();
        copy.customer_name = "changed".into();
        assert_eq!(original.customer_name, DEFAULT_CUSTOMER_NAME);
    }
}
