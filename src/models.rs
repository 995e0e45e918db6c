//! Domain types persisted in the JSON document store.
//!
//! Request DTOs carry the optional fields the admin frontend may omit; the
//! defaulting rules live in the `materialize` constructors so every route
//! applies them identically.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A news article in the live set or a daily archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub key_point: String,
    pub summary: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub importance_score: i64,
    #[serde(default)]
    pub published_at: String,
    pub created_at: String,
    #[serde(default)]
    pub is_today: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Article {
    /// UTC date (`YYYY-MM-DD`) this article was created on.
    #[must_use]
    pub fn created_date(&self) -> &str {
        date_part(&self.created_at)
    }
}

/// Incoming article payload for single-insert and batch-import.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleRequest {
    pub title: Option<String>,
    pub key_point: Option<String>,
    pub summary: Option<String>,
    pub source_url: Option<String>,
    /// Legacy field name still sent by older import scripts.
    pub url: Option<String>,
    pub source_name: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub country: Option<String>,
    pub importance_score: Option<i64>,
    pub published_at: Option<String>,
}

impl ArticleRequest {
    /// Materialize a full article, applying the import defaults.
    #[must_use]
    pub fn materialize(self, now: DateTime<Utc>) -> Article {
        let created_at = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Article {
            id: generate_article_id(now),
            title: non_empty_or(self.title, "无标题"),
            key_point: self.key_point.unwrap_or_default(),
            summary: non_empty_or(self.summary, "无摘要"),
            source_url: non_empty_or(self.source_url.or(self.url), "#"),
            source_name: non_empty_or(self.source_name, "其他"),
            category: non_empty_or(self.category, "未分类"),
            sub_category: self.sub_category.unwrap_or_default(),
            country: non_empty_or(self.country, "global"),
            importance_score: self.importance_score.unwrap_or(1),
            published_at: non_empty_or(self.published_at, &created_at),
            created_at,
            is_today: true,
            updated_at: None,
        }
    }
}

/// Keyword display size bucket for the word cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordSize {
    Large,
    Medium,
    Small,
}

impl KeywordSize {
    /// Derive the size bucket from a 1-10 weight.
    #[must_use]
    pub fn from_weight(weight: i64) -> Self {
        if weight >= 8 {
            Self::Large
        } else if weight >= 5 {
            Self::Medium
        } else {
            Self::Small
        }
    }

    /// Parse a size string, falling back to the weight-derived bucket.
    #[must_use]
    pub fn parse_or_derive(value: Option<&str>, weight: i64) -> Self {
        match value.map(str::trim).map(str::to_lowercase).as_deref() {
            Some("large") => Self::Large,
            Some("medium") => Self::Medium,
            Some("small") => Self::Small,
            _ => Self::from_weight(weight),
        }
    }
}

/// A word-cloud keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: serde_json::Value,
    pub text: String,
    pub weight: i64,
    pub size: KeywordSize,
    #[serde(rename = "fontSize", skip_serializing_if = "Option::is_none")]
    pub font_size: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// An admin account loaded from `admins.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: String,
}

/// A persisted IP ban. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: i64,
    pub ip: String,
    pub reason: String,
    #[serde(rename = "bannedAt")]
    pub banned_at: i64,
    #[serde(rename = "bannedUntil")]
    pub banned_until: i64,
    #[serde(rename = "callCount")]
    pub call_count: i64,
    #[serde(rename = "manualBan", default, skip_serializing_if = "is_false")]
    pub manual_ban: bool,
}

impl BanRecord {
    #[must_use]
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.banned_until > now_ms
    }
}

/// One recorded call against the rate-limited AI endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub ip: String,
    pub timestamp: i64,
    pub id: i64,
}

/// A catalog entry for an AI tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub subcategories: Vec<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub region_support: Vec<String>,
    #[serde(default)]
    pub language: Vec<String>,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub featured: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Incoming tool payload; defaults mirror the catalog import scripts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub categories: Option<Vec<String>>,
    pub subcategories: Option<Vec<String>>,
    pub region: Option<String>,
    pub region_support: Option<Vec<String>>,
    pub language: Option<Vec<String>>,
    pub price: Option<String>,
    pub rating: Option<f64>,
    pub website: Option<String>,
    pub logo: Option<String>,
    pub tags: Option<Vec<String>>,
    pub featured: Option<bool>,
    pub created_at: Option<String>,
}

impl ToolRequest {
    /// Materialize a full tool entry, applying the catalog defaults.
    #[must_use]
    pub fn materialize(self, now: DateTime<Utc>) -> Tool {
        let ts = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let name = non_empty_or(self.name, "未命名工具");
        let slug = self
            .slug
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&name));
        let region = non_empty_or(self.region, "国际");
        Tool {
            id: self
                .id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| generate_tool_id(now)),
            logo: self
                .logo
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("{slug}.png")),
            name,
            description: self.description.unwrap_or_default(),
            categories: self.categories.unwrap_or_default(),
            subcategories: self.subcategories.unwrap_or_default(),
            region_support: self
                .region_support
                .unwrap_or_else(|| vec![region.clone()]),
            region,
            language: self.language.unwrap_or_else(|| vec!["英文".to_string()]),
            price: non_empty_or(self.price, "免费"),
            rating: self.rating.unwrap_or(0.0),
            website: self.website.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            featured: self.featured.unwrap_or(false),
            created_at: self.created_at.filter(|s| !s.is_empty()).unwrap_or_else(|| ts.clone()),
            updated_at: ts,
            slug,
        }
    }
}

/// One tracked site visit (at most one per IP per day).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitLog {
    pub id: i64,
    pub ip: String,
    pub province: String,
    pub country: String,
    pub date: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

/// Run metadata for the weekly keyword job, used for idempotency checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklyJobState {
    #[serde(default)]
    pub last_attempt_at: Option<String>,
    #[serde(default)]
    pub last_attempt_week: Option<String>,
    #[serde(default)]
    pub last_success_at: Option<String>,
    #[serde(default)]
    pub last_success_week: Option<String>,
    #[serde(default)]
    pub source_range_start: Option<String>,
    #[serde(default)]
    pub source_range_end: Option<String>,
    #[serde(default)]
    pub source_file_count: Option<usize>,
    #[serde(default)]
    pub source_title_count: Option<usize>,
    #[serde(default)]
    pub keyword_count: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Article id: `YYYYMMDD` plus a zero-padded random 1..=9999 suffix.
///
/// Collisions are possible but not checked; this matches the ids already in
/// production data, so imports and updates stay compatible.
#[must_use]
pub fn generate_article_id(now: DateTime<Utc>) -> String {
    let sequence: u32 = rand::thread_rng().gen_range(1..=9999);
    format!("{}{sequence:04}", now.format("%Y%m%d"))
}

/// Tool id: `tool_<epoch-ms>_<7 alphanumerics>`.
#[must_use]
pub fn generate_tool_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("tool_{}_{suffix}", now.timestamp_millis())
}

/// Lowercase, non-alphanumerics collapsed to single dashes.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Default settings document written when `settings.json` is missing.
#[must_use]
pub fn default_settings(now: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "todayNewsDisplayCount": 20,
        "maxDisplayCount": 50,
        "minDisplayCount": 1,
        "autoArchiveEnabled": true,
        "version": "1.0.0",
        "lastUpdated": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

/// Loose id comparison for documents whose ids may be numbers or strings.
///
/// Keyword ids are epoch-millisecond numbers when created interactively but
/// date-prefixed strings when batch-imported; path parameters are always
/// strings.
#[must_use]
pub fn id_matches(id: &serde_json::Value, needle: &str) -> bool {
    match id {
        serde_json::Value::String(s) => s == needle,
        serde_json::Value::Number(n) => n.to_string() == needle,
        _ => false,
    }
}

/// `YYYY-MM-DD` prefix of an RFC 3339 timestamp.
#[must_use]
pub fn date_part(timestamp: &str) -> &str {
    timestamp.split('T').next().unwrap_or(timestamp)
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_to_size_mapping() {
        assert_eq!(KeywordSize::from_weight(10), KeywordSize::Large);
        assert_eq!(KeywordSize::from_weight(8), KeywordSize::Large);
        assert_eq!(KeywordSize::from_weight(7), KeywordSize::Medium);
        assert_eq!(KeywordSize::from_weight(6), KeywordSize::Medium);
        assert_eq!(KeywordSize::from_weight(5), KeywordSize::Medium);
        assert_eq!(KeywordSize::from_weight(4), KeywordSize::Small);
        assert_eq!(KeywordSize::from_weight(1), KeywordSize::Small);
    }

    #[test]
    fn test_parse_or_derive_size() {
        assert_eq!(
            KeywordSize::parse_or_derive(Some("LARGE"), 1),
            KeywordSize::Large
        );
        assert_eq!(
            KeywordSize::parse_or_derive(Some("bogus"), 9),
            KeywordSize::Large
        );
        assert_eq!(KeywordSize::parse_or_derive(None, 6), KeywordSize::Medium);
    }

    #[test]
    fn test_article_id_shape() {
        let now = chrono::Utc::now();
        let id = generate_article_id(now);
        assert_eq!(id.len(), 12);
        assert!(id.starts_with(&now.format("%Y%m%d").to_string()));
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_article_defaults() {
        let article = ArticleRequest {
            url: Some("https://example.com/a".to_string()),
            ..Default::default()
        }
        .materialize(chrono::Utc::now());

        assert_eq!(article.title, "无标题");
        assert_eq!(article.summary, "无摘要");
        assert_eq!(article.source_url, "https://example.com/a");
        assert_eq!(article.source_name, "其他");
        assert_eq!(article.category, "未分类");
        assert_eq!(article.country, "global");
        assert_eq!(article.importance_score, 1);
        assert!(article.is_today);
        assert_eq!(article.published_at, article.created_at);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("ChatGPT Plus!"), "chatgpt-plus");
        assert_eq!(slugify("--a--b--"), "a-b");
        assert_eq!(slugify("中文名"), "");
    }

    #[test]
    fn test_date_part() {
        assert_eq!(date_part("2025-01-15T09:00:00.000Z"), "2025-01-15");
        assert_eq!(date_part("2025-01-15"), "2025-01-15");
    }
}
