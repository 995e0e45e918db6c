//! Daily news archival.
//!
//! The live set (`news.json`) only ever holds articles created "today".
//! Everything older is rolled over into immutable-by-convention per-date
//! files under `archive/daily/news-<date>.json`. Reads present a unified view
//! across the live set, the archive, and legacy loose date files that earlier
//! upload scripts dropped directly into the data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::Article;
use crate::store::{read_vec, write_json, DocumentStore, StoreError};

/// Allow-list for user-supplied archive keys. Anything outside it is rejected
/// before touching the filesystem; this is a security contract, not input
/// cleanup.
static ARCHIVE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,80}$").expect("valid regex"));

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

static ARCHIVE_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^news-(\d{4}-\d{2}-\d{2})\.json$").expect("valid regex"));

static LOOSE_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:news-)?(\d{4}-\d{2}-\d{2})\.json$").expect("valid regex"));

/// Result of one rollover pass.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ArchiveResult {
    /// Distinct non-today dates flushed to archive files.
    pub archived: usize,
    /// Articles retained in the live set.
    #[serde(rename = "todayCount")]
    pub today_count: usize,
}

/// Where a date's count was sourced from, for the dates listing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    Current,
    Archive,
    Data,
}

/// One entry in the available-dates listing.
#[derive(Debug, Clone, Serialize)]
pub struct DateCount {
    pub date: String,
    pub count: usize,
    pub source: DateSource,
}

/// Partitions news by creation date and serves merged per-date reads.
#[derive(Clone)]
pub struct ArchiveManager {
    store: Arc<dyn DocumentStore>,
    data_dir: PathBuf,
    daily_dir: PathBuf,
}

impl ArchiveManager {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, data_dir: PathBuf) -> Self {
        let daily_dir = data_dir.join("archive").join("daily");
        Self {
            store,
            data_dir,
            daily_dir,
        }
    }

    #[must_use]
    pub fn daily_dir(&self) -> &Path {
        &self.daily_dir
    }

    /// Move every non-today article out of the live set into its per-date
    /// archive file (appending to any existing archive content), then rewrite
    /// the live set with only today's articles.
    ///
    /// Re-running with no new data is a no-op on the live file's content.
    ///
    /// # Errors
    ///
    /// Propagates write failures; read failures degrade to an empty live set.
    pub async fn archive_old_news(&self) -> Result<ArchiveResult, StoreError> {
        let news: Vec<Article> = read_vec(self.store.as_ref(), "news").await;
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let mut today_news = Vec::new();
        let mut by_date: BTreeMap<String, Vec<Article>> = BTreeMap::new();
        for article in news {
            let date = article.created_date().to_string();
            if date == today {
                today_news.push(article);
            } else {
                by_date.entry(date).or_default().push(article);
            }
        }

        let mut archived = 0;
        for (date, articles) in by_date {
            // Dates come from persisted article data; a malformed created_at
            // must not turn into an arbitrary file path.
            if !DATE_RE.is_match(&date) {
                warn!(date, "Skipping articles with malformed created_at date");
                continue;
            }
            let key = format!("archive/daily/news-{date}");
            let mut merged = self.read_articles_by_key(&key).await.unwrap_or_default();
            let count = articles.len();
            merged.extend(articles);
            write_json(self.store.as_ref(), &key, &merged).await?;
            info!(count, date, "Archived daily articles");
            archived += 1;
        }

        write_json(self.store.as_ref(), "news", &today_news).await?;
        info!(today_count = today_news.len(), "Rewrote live news set");

        Ok(ArchiveResult {
            archived,
            today_count: today_news.len(),
        })
    }

    /// All articles for one date: archive file first, else a loose
    /// `news-<date>.json` or `<date>.json` in the data directory, then any
    /// live-set articles created on that date.
    ///
    /// The three sources can overlap after a re-import; the union is served
    /// without deduplication on purpose (the frontend tolerates duplicates,
    /// and dedup here would mask partial-write incidents).
    pub async fn news_for_date(&self, date: &str) -> Vec<Article> {
        let mut news = Vec::new();

        if let Some(articles) = self
            .read_articles_by_key(&format!("archive/daily/news-{date}"))
            .await
        {
            news = articles;
        } else if let Some(articles) = self.read_articles_by_key(&format!("news-{date}")).await {
            news = articles;
        } else if let Some(articles) = self.read_articles_by_key(date).await {
            news = articles;
        }

        let live: Vec<Article> = read_vec(self.store.as_ref(), "news").await;
        news.extend(live.into_iter().filter(|a| a.created_date() == date));
        news
    }

    /// Today's loose daily file, if an upload script dropped one directly in
    /// the data directory. Used as a fallback when the live set has no
    /// today rows.
    pub async fn loose_file_for_date(&self, date: &str) -> Option<Vec<Article>> {
        if let Some(articles) = self.read_articles_by_key(&format!("news-{date}")).await {
            return Some(articles);
        }
        self.read_articles_by_key(date).await
    }

    /// Per-date article counts across the live set, the archive directory,
    /// and loose date files, sorted descending by date string.
    ///
    /// Archive-sourced counts win over loose-file counts for the same date.
    /// Unreadable files are skipped, never fatal.
    pub async fn available_dates(&self) -> Vec<DateCount> {
        let mut dates: BTreeMap<String, DateCount> = BTreeMap::new();
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let live: Vec<Article> = read_vec(self.store.as_ref(), "news").await;
        for article in &live {
            let date = match article.created_date() {
                "" => today.clone(),
                d => d.to_string(),
            };
            dates
                .entry(date.clone())
                .or_insert(DateCount {
                    date,
                    count: 0,
                    source: DateSource::Current,
                })
                .count += 1;
        }

        for (date, count) in self.scan_dir(&self.daily_dir, &ARCHIVE_FILE_RE).await {
            match dates.get_mut(&date) {
                Some(entry) => entry.count += count,
                None => {
                    dates.insert(
                        date.clone(),
                        DateCount {
                            date,
                            count,
                            source: DateSource::Archive,
                        },
                    );
                }
            }
        }

        for (date, count) in self.scan_dir(&self.data_dir, &LOOSE_FILE_RE).await {
            match dates.get_mut(&date) {
                Some(entry) if entry.source == DateSource::Archive => {}
                Some(entry) => entry.count += count,
                None => {
                    dates.insert(
                        date.clone(),
                        DateCount {
                            date,
                            count,
                            source: DateSource::Data,
                        },
                    );
                }
            }
        }

        let mut result: Vec<DateCount> = dates.into_values().collect();
        result.sort_by(|a, b| b.date.cmp(&a.date));
        result
    }

    /// Archive keys (file stems) present in the daily archive directory,
    /// newest first.
    pub async fn archive_dates(&self) -> Vec<String> {
        let mut dates = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.daily_dir).await else {
            return dates;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".json") {
                dates.push(stem.to_string());
            }
        }
        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    /// Read one archive document by validated key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the file does not exist.
    pub async fn read_archive(&self, key: &str) -> Result<Vec<Article>, StoreError> {
        let value = self.store.read(&format!("archive/daily/{key}")).await?;
        Ok(normalize_articles(value))
    }

    /// Delete one archive document by validated key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the file does not exist.
    pub async fn delete_archive(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(&format!("archive/daily/{key}")).await
    }

    async fn read_articles_by_key(&self, key: &str) -> Option<Vec<Article>> {
        match self.store.read(key).await {
            Ok(value) => Some(normalize_articles(value)),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                error!(key, "Skipping unreadable news file: {e}");
                None
            }
        }
    }

    /// Count articles per date for files in `dir` matching `pattern`
    /// (capture group 1 is the date). `news.json` itself never matches.
    async fn scan_dir(&self, dir: &Path, pattern: &Regex) -> Vec<(String, usize)> {
        let mut counts = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return counts;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = pattern
                .captures(&name)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };
            let path = entry.path();
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(value) => counts.push((date, normalize_articles(value).len())),
                    Err(e) => {
                        error!(path = %path.display(), "Skipping unparseable news file: {e}");
                    }
                },
                Err(e) => {
                    error!(path = %path.display(), "Skipping unreadable news file: {e}");
                }
            }
        }
        counts
    }
}

/// Accept both historical payload shapes: a bare array or `{articles: [...]}`.
#[must_use]
pub fn normalize_articles(value: serde_json::Value) -> Vec<Article> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("articles") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Resolve a user-supplied archive key to a file path inside `dir`.
///
/// Rejects keys outside `[A-Za-z0-9_-]{1,80}` and any resolution that would
/// escape the archive directory.
#[must_use]
pub fn resolve_safe_archive_file(dir: &Path, key: &str) -> Option<PathBuf> {
    if !ARCHIVE_KEY_RE.is_match(key) {
        return None;
    }
    let file = dir.join(format!("{key}.json"));
    if file.parent() != Some(dir) {
        return None;
    }
    Some(file)
}
