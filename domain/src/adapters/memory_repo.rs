use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::{AnalyticsStore, Click, Code, Link, LinkOverview, LinkStore, StoreError};

/// In-memory store. One reader/writer lock guards the whole code -> link map:
/// every mutation takes the write lock, lookups and listings the read lock.
pub struct InMemoryStore {
    inner: RwLock<BTreeMap<String, Link>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(code: &Code) -> String {
        code.as_str().to_string()
    }

    // Rebuild from scratch so no history from the caller's value survives.
    fn fresh(link: Link) -> Link {
        Link::new(link.code, link.original_url, link.created_at, link.expires_at)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Link>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Link>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStore for InMemoryStore {
    fn save(&self, link: Link) -> Result<(), StoreError> {
        let mut map = self.write()?;
        let key = Self::key(&link.code);
        if map.contains_key(&key) {
            return Err(StoreError::CodeExists);
        }
        map.insert(key, link);
        Ok(())
    }

    fn get(&self, code: &Code) -> Result<Option<Link>, StoreError> {
        let map = self.read()?;
        Ok(map.get(code.as_str()).cloned())
    }
}

impl AnalyticsStore for InMemoryStore {
    fn upsert(&self, link: Link) -> Result<(), StoreError> {
        let fresh = Self::fresh(link);
        let mut map = self.write()?;
        map.insert(Self::key(&fresh.code), fresh);
        Ok(())
    }

    fn replace_expired(&self, link: Link, now: SystemTime) -> Result<Option<usize>, StoreError> {
        let mut map = self.write()?;
        let dropped = match map.get(link.code.as_str()) {
            Some(existing) if existing.is_expired(now) => existing.total_clicks(),
            _ => return Ok(None),
        };
        let fresh = Self::fresh(link);
        map.insert(Self::key(&fresh.code), fresh);
        Ok(Some(dropped))
    }

    fn list(&self) -> Result<Vec<LinkOverview>, StoreError> {
        let map = self.read()?;
        let mut items: Vec<LinkOverview> = map.values().map(LinkOverview::from).collect();
        drop(map);
        // Sort by created_at desc
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    fn record_click(&self, code: &Code, click: Click) -> Result<Link, StoreError> {
        let mut map = self.write()?;
        match map.get_mut(code.as_str()) {
            Some(link) => {
                link.push_click(click);
                Ok(link.clone())
            }
            None => Err(StoreError::NotFound),
        }
    }
}
