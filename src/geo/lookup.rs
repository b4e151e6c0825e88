//! Geo Lookup Service
//!
//! Network lookup performed on a cache miss. The default provider answers
//! `GET https://ipapi.co/<ip>/country/` with the bare country code as body.

use async_trait::async_trait;
use std::time::Duration;

use super::ResolutionError;
use crate::config::IP_PLACEHOLDER;
use crate::types::CountryCode;

/// IP-to-country lookup service
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Raw country code for `ip`, as answered by the provider
    async fn lookup_country(&self, ip: &str) -> Result<CountryCode, ResolutionError>;
}

/// Lookup over HTTP against a plain-text provider
pub struct HttpGeoLookup {
    client: reqwest::Client,

    /// URL with an `{ip}` placeholder
    url_template: String,
}

impl HttpGeoLookup {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, ResolutionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("peer-stats/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolutionError::Transport(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    fn url_for(&self, ip: &str) -> String {
        self.url_template.replace(IP_PLACEHOLDER, ip)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup_country(&self, ip: &str) -> Result<CountryCode, ResolutionError> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(|e| ResolutionError::Transport(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ResolutionError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolutionError::Transport(format!("Read body failed: {}", e)))?;

        Ok(body.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_template() {
        let lookup = HttpGeoLookup::new("https://ipapi.co/{ip}/country/", Duration::from_secs(5)).unwrap();
        assert_eq!(lookup.url_for("1.1.1.1"), "https://ipapi.co/1.1.1.1/country/");
    }

    #[test]
    fn test_url_template_ipv6() {
        let lookup = HttpGeoLookup::new("http://geo.local/lookup?ip={ip}", Duration::from_secs(5)).unwrap();
        assert_eq!(lookup.url_for("2001:db8::1"), "http://geo.local/lookup?ip=2001:db8::1");
    }
}
