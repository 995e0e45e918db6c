//! Weekly full-replacement regeneration of the keyword cloud.
//!
//! Every Monday (configurable hour/minute) the prior seven days of news
//! titles are summarized into exactly N keywords by an upstream model. The
//! run is gated on the ISO week id so restarts never double-run, and partial
//! results are never persisted: either the validated set has exactly N
//! entries and replaces `keywords.json` wholesale, or nothing is written.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ai::UpstreamConfig;
use crate::models::{Keyword, KeywordSize, WeeklyJobState};
use crate::store::{read_or, write_json, DocumentStore};

const STATE_KEY: &str = "keywords-weekly-job";
const KEYWORDS_KEY: &str = "keywords";
const SCHEDULER_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_PROMPT_TITLES: usize = 180;

static DAILY_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^news-(\d{4}-\d{2}-\d{2})\.json$").expect("valid regex"));

/// Outcome of one job invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The gate said not now, or there was nothing to summarize.
    Skipped(SkipReason),
    /// The keyword set was fully replaced.
    Updated {
        keyword_count: usize,
        title_count: usize,
        file_count: usize,
        range_start: String,
        range_end: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotDue,
    ApiKeyMissing,
    NoTitles,
}

/// A validated keyword straight from the model, before materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKeyword {
    pub text: String,
    pub weight: i64,
    pub size: KeywordSize,
}

/// The weekly keyword regeneration job.
#[derive(Clone)]
pub struct WeeklyKeywordsJob {
    store: Arc<dyn DocumentStore>,
    data_dir: std::path::PathBuf,
    daily_dir: std::path::PathBuf,
    upstream: UpstreamConfig,
    system_prompt: String,
    keyword_count: usize,
    run_hour: u32,
    run_minute: u32,
    model_timeout: Duration,
    http: reqwest::Client,
}

impl WeeklyKeywordsJob {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        data_dir: std::path::PathBuf,
        upstream: UpstreamConfig,
        system_prompt: String,
        keyword_count: usize,
        run_hour: u32,
        run_minute: u32,
        model_timeout: Duration,
    ) -> Self {
        let daily_dir = data_dir.join("archive").join("daily");
        Self {
            store,
            data_dir,
            daily_dir,
            upstream,
            system_prompt,
            keyword_count: keyword_count.clamp(5, 80),
            run_hour: run_hour.min(23),
            run_minute: run_minute.min(59),
            model_timeout,
            http: reqwest::Client::new(),
        }
    }

    /// Run the job if due (or unconditionally when `force` is set).
    ///
    /// # Errors
    ///
    /// Fails when the model call fails or its response does not validate to
    /// exactly the configured keyword count. The keywords file is untouched
    /// on every failure path.
    pub async fn run_once(&self, force: bool) -> Result<RunOutcome> {
        let now = Local::now();
        let current_week = iso_week_id(now.date_naive());

        if !force && !self.is_due(now).await {
            return Ok(RunOutcome::Skipped(SkipReason::NotDue));
        }

        if !self.upstream.is_key_configured() {
            warn!("Weekly keyword job skipped: model API key not configured");
            return Ok(RunOutcome::Skipped(SkipReason::ApiKeyMissing));
        }

        let (range_start, range_end) = recent_7day_range(now.date_naive());
        let (titles, file_count) = self.collect_titles(range_start, range_end).await;

        if titles.is_empty() {
            warn!("Weekly keyword job skipped: no titles in the last 7 days, keywords left untouched");
            let previous = self.read_state().await;
            self.write_state(WeeklyJobState {
                last_attempt_at: Some(now.to_rfc3339()),
                last_attempt_week: Some(current_week),
                last_error: Some("no_titles".to_string()),
                last_success_week: previous.last_success_week,
                last_success_at: previous.last_success_at,
                ..Default::default()
            })
            .await;
            return Ok(RunOutcome::Skipped(SkipReason::NoTitles));
        }

        let prompt = build_prompt(&titles, self.keyword_count, range_start, range_end);
        let raw = self.request_keywords(&prompt).await?;

        let parsed: Value = serde_json::from_str(strip_code_fence(&raw))
            .context("Model response is not valid JSON")?;
        let validated = validate_keywords(&parsed, self.keyword_count).ok_or_else(|| {
            anyhow!(
                "Keyword payload invalid or count != {}",
                self.keyword_count
            )
        })?;

        let materialized = materialize_keywords(&validated, now);
        write_json(self.store.as_ref(), KEYWORDS_KEY, &materialized)
            .await
            .context("Failed to write keywords file")?;

        self.write_state(WeeklyJobState {
            last_attempt_at: Some(now.to_rfc3339()),
            last_attempt_week: Some(current_week.clone()),
            last_success_at: Some(now.to_rfc3339()),
            last_success_week: Some(current_week),
            source_range_start: Some(range_start.to_string()),
            source_range_end: Some(range_end.to_string()),
            source_file_count: Some(file_count),
            source_title_count: Some(titles.len()),
            keyword_count: Some(materialized.len()),
            model: Some(self.upstream.model.clone()),
            last_error: None,
        })
        .await;

        info!(
            keywords = materialized.len(),
            titles = titles.len(),
            files = file_count,
            range = %format!("{range_start}~{range_end}"),
            "Weekly keyword set replaced"
        );

        Ok(RunOutcome::Updated {
            keyword_count: materialized.len(),
            title_count: titles.len(),
            file_count,
            range_start: range_start.to_string(),
            range_end: range_end.to_string(),
        })
    }

    /// Due on Mondays at/after the configured time, at most once per ISO week.
    async fn is_due(&self, now: DateTime<Local>) -> bool {
        if now.weekday() != Weekday::Mon {
            return false;
        }
        let time_due = (now.hour(), now.minute()) >= (self.run_hour, self.run_minute);
        if !time_due {
            return false;
        }
        let state = self.read_state().await;
        state.last_success_week.as_deref() != Some(iso_week_id(now.date_naive()).as_str())
    }

    /// Titles from every `news-<date>.json` in the archive and data
    /// directories within the window, deduplicated case-insensitively.
    async fn collect_titles(&self, start: NaiveDate, end: NaiveDate) -> (Vec<String>, usize) {
        let mut titles = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut file_count = 0;

        let daily_dir = self.daily_dir.clone();
        let data_dir = self.data_dir.clone();
        for dir in [daily_dir.as_path(), data_dir.as_path()] {
            for (path, _date) in list_daily_files(dir, start, end).await {
                file_count += 1;
                let value = match tokio::fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                        Ok(value) => value,
                        Err(e) => {
                            error!(path = %path.display(), "Skipping unparseable daily file: {e}");
                            continue;
                        }
                    },
                    Err(e) => {
                        error!(path = %path.display(), "Skipping unreadable daily file: {e}");
                        continue;
                    }
                };
                for article in crate::archive::normalize_articles(value) {
                    let title = article.title.trim().to_string();
                    if title.is_empty() {
                        continue;
                    }
                    if seen.insert(title.to_lowercase()) {
                        titles.push(title);
                    }
                }
            }
        }
        (titles, file_count)
    }

    async fn request_keywords(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.upstream.model,
            "stream": false,
            "temperature": 0.2,
            "max_tokens": 4000,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .http
            .post(&self.upstream.api_url)
            .bearer_auth(self.upstream.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .timeout(self.model_timeout)
            .send()
            .await
            .context("Model API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Model API error {status}: {}",
                body.chars().take(300).collect::<String>()
            );
        }

        let data: Value = response
            .json()
            .await
            .context("Model API returned a non-JSON body")?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Model response missing choices[0].message.content"))
    }

    async fn read_state(&self) -> WeeklyJobState {
        read_or(self.store.as_ref(), STATE_KEY, WeeklyJobState::default()).await
    }

    async fn write_state(&self, state: WeeklyJobState) {
        if let Err(e) = write_json(self.store.as_ref(), STATE_KEY, &state).await {
            error!("Failed to persist weekly job state: {e}");
        }
    }

    /// Record a failed attempt in the state file without clearing the last
    /// success marker.
    pub async fn record_failure(&self, message: &str) {
        let now = Local::now();
        let mut state = self.read_state().await;
        state.last_attempt_at = Some(now.to_rfc3339());
        state.last_attempt_week = Some(iso_week_id(now.date_naive()));
        state.last_error = Some(message.to_string());
        self.write_state(state).await;
    }
}

/// ISO week identifier, e.g. `2025-W03`.
#[must_use]
pub fn iso_week_id(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// The rolling window: yesterday back seven days, today excluded.
#[must_use]
pub fn recent_7day_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        today - chrono::Days::new(7),
        today - chrono::Days::new(1),
    )
}

/// Strip an optional ```json fence from a model response.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
    rest.strip_suffix("```").map_or(trimmed, str::trim)
}

/// Validate the model payload into exactly `expected` unique keywords.
///
/// Returns `None` when the shape is wrong or the deduplicated count does not
/// match; callers must treat that as a hard failure.
#[must_use]
pub fn validate_keywords(payload: &Value, expected: usize) -> Option<Vec<ValidatedKeyword>> {
    let items = payload
        .as_array()
        .or_else(|| payload.get("keywords").and_then(Value::as_array))?;

    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for item in items {
        let text = item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }
        let weight = item
            .get("weight")
            .and_then(Value::as_f64)
            .map_or(1, |w| w.round() as i64)
            .clamp(1, 10);
        let size =
            KeywordSize::parse_or_derive(item.get("size").and_then(Value::as_str), weight);
        if !seen.insert(text.clone()) {
            continue;
        }
        unique.push(ValidatedKeyword { text, weight, size });
        if unique.len() >= expected {
            break;
        }
    }

    (unique.len() == expected).then_some(unique)
}

/// Fixed-shape prompt demanding exactly `count` keywords as strict JSON.
#[must_use]
pub fn build_prompt(
    titles: &[String],
    count: usize,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> String {
    let input_titles: Vec<&String> = titles.iter().take(MAX_PROMPT_TITLES).collect();
    [
        "你是资深 AI 科技编辑。请根据给定新闻标题生成词云关键词。".to_string(),
        format!("时间范围: {range_start} 到 {range_end}（最近7天，不含今天）"),
        format!("固定输出 {count} 个关键词，按热度排序，不能重复。"),
        "仅输出 JSON，不要解释，不要 markdown。".to_string(),
        "格式必须是: {\"keywords\":[{\"text\":\"词\",\"weight\":1-10,\"size\":\"large|medium|small\"}]}".to_string(),
        "约束:".to_string(),
        "- 关键词必须与 AI 领域直接相关（模型、芯片、Agent、开源、推理、数据、应用、投融资等）。".to_string(),
        "- 禁止输出与 AI 无关的泛词（如娱乐八卦、体育、纯政治口号）。".to_string(),
        "- text: 2-16 个字符，中文优先，可包含英文产品名。".to_string(),
        "- weight: 1-10 的整数。".to_string(),
        "- size 与 weight 一致: weight>=8 => large, 5-7 => medium, <=4 => small。".to_string(),
        String::new(),
        "新闻标题列表(JSON):".to_string(),
        serde_json::to_string(&input_titles).unwrap_or_else(|_| "[]".to_string()),
    ]
    .join("\n")
}

/// Turn validated keywords into stored records with fresh ids/timestamps.
#[must_use]
pub fn materialize_keywords(items: &[ValidatedKeyword], now: DateTime<Local>) -> Vec<Keyword> {
    let ts = now.to_rfc3339();
    let base = now.timestamp_millis();
    items
        .iter()
        .enumerate()
        .map(|(index, item)| Keyword {
            id: Value::from(base + index as i64),
            text: item.text.clone(),
            weight: item.weight,
            size: item.size,
            font_size: None,
            created_at: ts.clone(),
            updated_at: ts.clone(),
        })
        .collect()
}

/// Daily files in `dir` whose date falls inside `[start, end]`.
async fn list_daily_files(
    dir: &Path,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(std::path::PathBuf, NaiveDate)> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(date) = DAILY_FILE_RE
            .captures(&name)
            .and_then(|c| c.get(1))
            .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date >= start && date <= end {
            files.push((entry.path(), date));
        }
    }
    files
}

/// Scheduler loop: every five minutes, run the job if due. Failed attempts
/// are recorded in the state file and retried on the next tick.
pub async fn run_scheduler(job: WeeklyKeywordsJob, shutdown: CancellationToken) {
    info!(
        interval_secs = SCHEDULER_INTERVAL.as_secs(),
        "Starting weekly keyword scheduler"
    );
    let mut ticker = tokio::time::interval(SCHEDULER_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = job.run_once(false).await {
                    error!("Weekly keyword job failed: {e:#}");
                    job.record_failure(&e.to_string()).await;
                }
            }
            () = shutdown.cancelled() => {
                info!("Weekly keyword scheduler shutting down");
                break;
            }
        }
    }
}
