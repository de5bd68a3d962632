//! Domain library for the URL Shortener.
//!
//! Holds the link/click model, the storage ports (traits), the lifecycle
//! service and the error definitions. Adapters with IO (SQLite, HTTP) live in
//! their own crates; the in-memory store lives here so the domain stays
//! testable on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Country recorded for clicks whose origin could not be determined.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Lifetime given to links created without an explicit expiry.
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A URL-safe short code identifying a link.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Code(String);

impl Code {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidCode("empty".into()));
        }
        if !val
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidCode("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded redirect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Click {
    pub timestamp: SystemTime,
    /// Client IP; empty when it could not be determined.
    pub ip: String,
    pub country: String,
    pub user_agent: String,
}

/// Stored short link together with its click history.
///
/// `clicks` and `unique_ips` are only ever changed by a store recording a
/// click, so they cannot drift apart from each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub code: Code,
    pub original_url: String,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    clicks: Vec<Click>,
    unique_ips: BTreeSet<String>,
}

impl Link {
    /// Create a link with an empty click history.
    pub fn new(
        code: Code,
        original_url: String,
        created_at: SystemTime,
        expires_at: Option<SystemTime>,
    ) -> Self {
        Self {
            code,
            original_url,
            created_at,
            expires_at,
            clicks: Vec::new(),
            unique_ips: BTreeSet::new(),
        }
    }

    /// Rebuild a link from persisted parts. Used by storage adapters.
    pub fn restore(
        code: Code,
        original_url: String,
        created_at: SystemTime,
        expires_at: Option<SystemTime>,
        clicks: Vec<Click>,
        unique_ips: BTreeSet<String>,
    ) -> Self {
        Self {
            code,
            original_url,
            created_at,
            expires_at,
            clicks,
            unique_ips,
        }
    }

    /// Clicks in the order they were recorded.
    pub fn clicks(&self) -> &[Click] {
        &self.clicks
    }

    pub fn unique_ips(&self) -> &BTreeSet<String> {
        &self.unique_ips
    }

    pub fn total_clicks(&self) -> usize {
        self.clicks.len()
    }

    pub fn unique_visitors(&self) -> usize {
        self.unique_ips.len()
    }

    /// Append a click; a non-empty IP joins the unique set.
    pub(crate) fn push_click(&mut self, click: Click) {
        if !click.ip.is_empty() {
            self.unique_ips.insert(click.ip.clone());
        }
        self.clicks.push(click);
    }

    /// A link is expired once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

/// Aggregate row used by listings; carries counts instead of click bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkOverview {
    pub code: Code,
    pub original_url: String,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub total_clicks: usize,
    pub unique_visitors: usize,
}

impl From<&Link> for LinkOverview {
    fn from(link: &Link) -> Self {
        Self {
            code: link.code.clone(),
            original_url: link.original_url.clone(),
            created_at: link.created_at,
            expires_at: link.expires_at,
            total_clicks: link.total_clicks(),
            unique_visitors: link.unique_visitors(),
        }
    }
}

/// Externally visible view of a single link and its analytics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkDetails {
    pub code: Code,
    pub short_url: String,
    pub original_url: String,
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub total_clicks: usize,
    pub unique_visitors: usize,
    /// Timestamp of the most recent click, if any.
    pub last_accessed: Option<SystemTime>,
    pub country_counts: BTreeMap<String, usize>,
}

/// Input data for creating a new short link.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ShortenRequest {
    pub original_url: String,
    pub custom_alias: Option<String>,
    pub expires_at: Option<SystemTime>,
}

/// Click data gathered by the HTTP layer before it reaches the store.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ClickInput {
    pub ip: String,
    /// Empty when the country lookup failed.
    pub country: String,
    pub user_agent: String,
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Random code source; implementations hold no shared state.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, min_len: usize, max_len: usize) -> Result<Code, CoreError>;
}

/// Minimal storage port: insert and lookup.
pub trait LinkStore: Send + Sync {
    /// Insert a new link. Fails with `CodeExists` whenever the code is taken,
    /// expired or not.
    fn save(&self, link: Link) -> Result<(), StoreError>;
    /// Load a link with its full click history.
    fn get(&self, code: &Code) -> Result<Option<Link>, StoreError>;
}

/// Full storage port with analytics and expiry-triggered replacement.
pub trait AnalyticsStore: LinkStore {
    /// Overwrite whatever is stored at `link.code`, dropping its click
    /// history and unique IPs.
    fn upsert(&self, link: Link) -> Result<(), StoreError>;
    /// Atomically overwrite the link at `link.code` only if it has expired at
    /// `now`, dropping its click history and unique IPs. Returns the number of
    /// clicks dropped, or `None` when the code is absent or still live.
    fn replace_expired(&self, link: Link, now: SystemTime) -> Result<Option<usize>, StoreError>;
    /// Aggregate view of every link, newest first.
    fn list(&self) -> Result<Vec<LinkOverview>, StoreError>;
    /// Append a click and return the updated link.
    fn record_click(&self, code: &Code, click: Click) -> Result<Link, StoreError>;
}

impl<T: LinkStore + ?Sized> LinkStore for Arc<T> {
    fn save(&self, link: Link) -> Result<(), StoreError> {
        (**self).save(link)
    }

    fn get(&self, code: &Code) -> Result<Option<Link>, StoreError> {
        (**self).get(code)
    }
}

impl<T: AnalyticsStore + ?Sized> AnalyticsStore for Arc<T> {
    fn upsert(&self, link: Link) -> Result<(), StoreError> {
        (**self).upsert(link)
    }

    fn replace_expired(&self, link: Link, now: SystemTime) -> Result<Option<usize>, StoreError> {
        (**self).replace_expired(link, now)
    }

    fn list(&self) -> Result<Vec<LinkOverview>, StoreError> {
        (**self).list()
    }

    fn record_click(&self, code: &Code, click: Click) -> Result<Link, StoreError> {
        (**self).record_click(code, click)
    }
}

/// Errors produced by storage adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("short code already exists")]
    CodeExists,
    #[error("link not found")]
    NotFound,
    #[error("storage error: {0}")]
    Backend(String),
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid code: {0}")]
    InvalidCode(String),
    #[error("customAlias must be 3-30 characters (letters, numbers, underscores, hyphens)")]
    InvalidAlias,
    #[error("invalid expiresAt: {0}")]
    InvalidExpiry(String),
    #[error("short code already exists")]
    CodeExists,
    #[error("customAlias already in use")]
    AliasInUse,
    #[error("unable to find unique code after {0} attempts")]
    GenerationExhausted(usize),
    #[error("code generation failed: {0}")]
    Generation(String),
    #[error("link not found")]
    NotFound,
    #[error("link has expired")]
    Expired,
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - link store loaded", pkg, ver)
}

pub mod adapters;
pub mod geo;
pub mod service;
pub mod shortcode;
pub mod validate;
