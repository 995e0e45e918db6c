//! Short-TTL read cache for the keyword cloud.
//!
//! The public word cloud is the hottest read path and the file behind it
//! changes rarely, so reads are served from memory for a short window. Every
//! keyword write invalidates the cache so admins see their edits immediately.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::Keyword;
use crate::store::{read_vec, DocumentStore};

const DEFAULT_TTL: Duration = Duration::from_secs(45);

pub struct KeywordsCache {
    entry: RwLock<Option<(Vec<Keyword>, Instant)>>,
    ttl: Duration,
}

impl Default for KeywordsCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl KeywordsCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Cached keywords, if the entry is still fresh.
    #[must_use]
    pub fn get(&self) -> Option<Vec<Keyword>> {
        let guard = self.entry.read().ok()?;
        let (keywords, stored_at) = guard.as_ref()?;
        if stored_at.elapsed() < self.ttl {
            Some(keywords.clone())
        } else {
            None
        }
    }

    pub fn put(&self, keywords: Vec<Keyword>) {
        if let Ok(mut guard) = self.entry.write() {
            *guard = Some((keywords, Instant::now()));
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.entry.write() {
            *guard = None;
        }
    }

    /// Serve from cache, reading through to the store on a miss.
    pub async fn get_or_load(&self, store: &dyn DocumentStore) -> Vec<Keyword> {
        if let Some(keywords) = self.get() {
            return keywords;
        }
        let keywords: Vec<Keyword> = read_vec(store, "keywords").await;
        self.put(keywords.clone());
        keywords
    }
}
