//! IP -> country cache shared by the geo-IP lookup collaborator.
//!
//! A stale entry is dropped the next time it is read; `purge_expired` sweeps
//! the ones that are never read again. The clock is injected so expiry can be
//! tested without sleeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::Clock;

/// How long a resolved country stays cached.
pub const DEFAULT_GEO_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
struct Entry {
    country: String,
    expires: SystemTime,
}

pub struct GeoCache<C: Clock> {
    clock: C,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl<C: Clock> GeoCache<C> {
    pub fn new(clock: C, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached country for `ip`, evicting the entry if it has expired.
    pub fn get(&self, ip: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(ip)?;
        if now > entry.expires {
            entries.remove(ip);
            return None;
        }
        Some(entry.country.clone())
    }

    /// Remember `country` for `ip`. Empty countries are not cached.
    pub fn insert(&self, ip: &str, country: &str) {
        if country.is_empty() {
            return;
        }
        let expires = self.clock.now() + self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            ip.to_string(),
            Entry {
                country: country.to_string(),
                expires,
            },
        );
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
