use std::collections::BTreeMap;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::shortcode::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use crate::validate::{validate_custom_alias, validate_original_url};
use crate::{
    AnalyticsStore, Click, ClickInput, Clock, Code, CodeGenerator, CoreError, Link, LinkDetails,
    LinkOverview, ShortenRequest, StoreError, DEFAULT_LINK_TTL, UNKNOWN_COUNTRY,
};

/// Number of random draws before code generation gives up.
pub const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Application service coordinating the link lifecycle on top of a store.
///
/// It is generic over the store, the code generator and the clock so the
/// expiry and collision paths can be driven deterministically in tests.
/// Expired links are never reaped here: a code becomes reusable only when a
/// later creation request targets it.
pub struct LinkService<S: AnalyticsStore, G: CodeGenerator, C: Clock> {
    store: S,
    generator: G,
    clock: C,
}

impl<S: AnalyticsStore, G: CodeGenerator, C: Clock> LinkService<S, G, C> {
    pub fn new(store: S, generator: G, clock: C) -> Self {
        Self {
            store,
            generator,
            clock,
        }
    }

    /// Create a new short link from a validated request.
    pub fn create(&self, input: ShortenRequest) -> Result<Link, CoreError> {
        let original_url = validate_original_url(&input.original_url)?;
        let code = self.resolve_code(input.custom_alias.as_deref())?;
        let now = self.clock.now();
        let expires_at = expiry_for(input.expires_at, now)?;

        let link = Link::new(code, original_url, now, Some(expires_at));
        self.save_or_replace_link(link.clone())?;
        info!(code = %link.code, "link created");
        Ok(link)
    }

    /// Pick the code for a new link.
    ///
    /// A non-empty alias is validated and must not be stored yet, expired or
    /// not. Without an alias, random codes are drawn until one is free.
    pub fn resolve_code(&self, custom_alias: Option<&str>) -> Result<Code, CoreError> {
        let alias = custom_alias.map(str::trim).unwrap_or_default();
        if !alias.is_empty() {
            let code = validate_custom_alias(alias)?;
            if self.store.get(&code)?.is_some() {
                return Err(CoreError::CodeExists);
            }
            return Ok(code);
        }
        self.generate_unique_code()
    }

    fn generate_unique_code(&self) -> Result<Code, CoreError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = self.generator.generate(MIN_CODE_LENGTH, MAX_CODE_LENGTH)?;
            if self.store.get(&code)?.is_none() {
                return Ok(code);
            }
            debug!(code = %code, attempt, "generated code already taken");
        }
        Err(CoreError::GenerationExhausted(MAX_GENERATION_ATTEMPTS))
    }

    /// Persist `link`, overwriting an existing link only if it has expired.
    ///
    /// The expiry check and the overwrite happen in one store call, so of
    /// two concurrent creations on the same expired code only one succeeds.
    pub fn save_or_replace_link(&self, link: Link) -> Result<(), CoreError> {
        match self.store.save(link.clone()) {
            Ok(()) => return Ok(()),
            Err(StoreError::CodeExists) => {}
            Err(e) => return Err(CoreError::Storage(e)),
        }

        let code = link.code.clone();
        match self.store.replace_expired(link, self.clock.now())? {
            Some(dropped_clicks) => {
                info!(code = %code, dropped_clicks, "replacing expired link");
                Ok(())
            }
            None => Err(CoreError::AliasInUse),
        }
    }

    /// Run the URL and alias checks of `create` without storing anything.
    pub fn check_url_and_alias(
        &self,
        original_url: &str,
        custom_alias: Option<&str>,
    ) -> Result<(), CoreError> {
        validate_original_url(original_url)?;
        let alias = custom_alias.map(str::trim).unwrap_or_default();
        if !alias.is_empty() {
            self.resolve_code(Some(alias))?;
        }
        Ok(())
    }

    /// Load a live link; absent and expired links are rejected.
    pub fn lookup(&self, code: &Code) -> Result<Link, CoreError> {
        let link = self.store.get(code)?.ok_or(CoreError::NotFound)?;
        if link.is_expired(self.clock.now()) {
            return Err(CoreError::Expired);
        }
        Ok(link)
    }

    /// Record a redirect against a live link and return the updated link.
    pub fn record_visit(&self, code: &Code, input: ClickInput) -> Result<Link, CoreError> {
        self.lookup(code)?;
        let country = if input.country.trim().is_empty() {
            UNKNOWN_COUNTRY.to_string()
        } else {
            input.country
        };
        let click = Click {
            timestamp: self.clock.now(),
            ip: input.ip,
            country,
            user_agent: input.user_agent,
        };
        self.store.record_click(code, click).map_err(|e| match e {
            StoreError::NotFound => CoreError::NotFound,
            other => CoreError::Storage(other),
        })
    }

    /// Analytics view of a live link.
    pub fn details(&self, code: &Code, base_url: &str) -> Result<LinkDetails, CoreError> {
        let link = self.lookup(code)?;
        Ok(build_link_details(&link, base_url))
    }

    /// Aggregate view of every stored link, expired ones included.
    pub fn list(&self) -> Result<Vec<LinkOverview>, CoreError> {
        Ok(self.store.list()?)
    }
}

fn expiry_for(requested: Option<SystemTime>, now: SystemTime) -> Result<SystemTime, CoreError> {
    match requested {
        None => Ok(now + DEFAULT_LINK_TTL),
        Some(t) if t < now => Err(CoreError::InvalidExpiry(
            "expiresAt must be in the future".into(),
        )),
        Some(t) => Ok(t),
    }
}

/// Public URL of `code` under `base_url`.
pub fn short_url(base_url: &str, code: &Code) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), code)
}

/// Compose the analytics view of a link.
///
/// `last_accessed` is the newest click; clicks without a country count
/// towards "Unknown".
pub fn build_link_details(link: &Link, base_url: &str) -> LinkDetails {
    let mut country_counts: BTreeMap<String, usize> = BTreeMap::new();
    for click in link.clicks() {
        let country = if click.country.is_empty() {
            UNKNOWN_COUNTRY
        } else {
            click.country.as_str()
        };
        *country_counts.entry(country.to_string()).or_default() += 1;
    }

    LinkDetails {
        code: link.code.clone(),
        short_url: short_url(base_url, &link.code),
        original_url: link.original_url.clone(),
        created_at: link.created_at,
        expires_at: link.expires_at,
        total_clicks: link.total_clicks(),
        unique_visitors: link.unique_visitors(),
        last_accessed: link.clicks().last().map(|c| c.timestamp),
        country_counts,
    }
}
