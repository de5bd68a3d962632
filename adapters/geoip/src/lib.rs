//! geoip — best-effort IP → country lookup over HTTP.
//!
//! Purpose
//! - Resolve the visitor country recorded with each click.
//! - Answers are cached per IP for `domain::geo::DEFAULT_GEO_TTL`.
//!
//! API
//! - `GeoLookup::country_for(ip)` → country code, or `"Unknown"` on any failure.
//!
//! Notes
//! - The endpoint is a URL template (default `https://ipapi.co/%s/country/`).
//!   A `%s` placeholder is replaced with the IP; otherwise the IP is appended
//!   as a trailing path segment.
//! - The response body is the country code as plain text.
//! - Lookups never fail the caller; errors are logged at `warn`.
//! - `purge_expired` should be called periodically so IPs that never return
//!   do not stay cached.

use std::net::IpAddr;
use std::time::Duration;

use domain::geo::{GeoCache, DEFAULT_GEO_TTL};
use domain::{Clock, SystemClock, UNKNOWN_COUNTRY};
use tracing::{trace, warn};

pub const DEFAULT_ENDPOINT: &str = "https://ipapi.co/%s/country/";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("not an ip address: {0}")]
    InvalidIp(String),
    #[error("geo lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geo lookup failed with status {0}")]
    Status(u16),
    #[error("empty geo response")]
    Empty,
}

pub struct GeoLookup<C: Clock = SystemClock> {
    endpoint: String,
    client: reqwest::Client,
    cache: GeoCache<C>,
}

impl GeoLookup<SystemClock> {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GeoError> {
        Self::with_clock(endpoint, SystemClock)
    }
}

impl<C: Clock> GeoLookup<C> {
    pub fn with_clock(endpoint: impl Into<String>, clock: C) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
            cache: GeoCache::new(clock, DEFAULT_GEO_TTL),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sweep cached answers whose TTL has passed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.cache.purge_expired();
        if removed > 0 {
            trace!(removed, "geo cache purged");
        }
        removed
    }

    /// Country code for `ip`; `"Unknown"` when it cannot be determined.
    pub async fn country_for(&self, ip: &str) -> String {
        if ip.is_empty() {
            return UNKNOWN_COUNTRY.to_string();
        }
        if let Some(country) = self.cache.get(ip) {
            trace!(ip, %country, "geo cache hit");
            return country;
        }
        match self.fetch(ip).await {
            Ok(country) => {
                self.cache.insert(ip, &country);
                country
            }
            Err(e) => {
                warn!(ip, error = %e, "geo lookup failed");
                UNKNOWN_COUNTRY.to_string()
            }
        }
    }

    async fn fetch(&self, ip: &str) -> Result<String, GeoError> {
        let url = lookup_url(&self.endpoint, ip)?;
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(GeoError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let country = body.trim();
        if country.is_empty() {
            return Err(GeoError::Empty);
        }
        Ok(country.to_string())
    }
}

/// Build the lookup URL for `ip`. Only literal IP addresses are accepted, so
/// the value never needs escaping inside a path.
fn lookup_url(endpoint: &str, ip: &str) -> Result<String, GeoError> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;
    if endpoint.contains("%s") {
        Ok(endpoint.replacen("%s", &addr.to_string(), 1))
    } else {
        Ok(format!("{}/{}", endpoint.trim_end_matches('/'), addr))
    }
}
