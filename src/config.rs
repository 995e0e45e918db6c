use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub host: String,
    pub port: u16,

    // Data layout
    pub data_dir: PathBuf,
    pub static_root: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub system_prompt_path: PathBuf,

    // Auth
    pub jwt_secret: String,
    pub default_admin_username: Option<String>,
    pub default_admin_password: Option<String>,
    pub default_admin_role: String,

    // AI chat proxy upstream
    pub chat_api_key: Option<String>,
    pub chat_api_url: String,
    pub chat_model: String,

    // Weekly keyword job upstream (falls back to the chat key)
    pub weekly_api_key: Option<String>,
    pub weekly_api_url: String,
    pub weekly_model: String,
    pub weekly_keyword_count: usize,
    pub weekly_run_hour: u32,
    pub weekly_run_minute: u32,
    pub weekly_model_timeout: Duration,
    pub weekly_run_on_startup: bool,

    // Rate limiting
    pub rate_limit_max_calls: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_ban_duration: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chat_api_key = optional_env("QWEN_API_KEY");
        let weekly_api_key = optional_env("DEEPSEEK_API_KEY").or_else(|| chat_api_key.clone());
        let weekly_api_url = normalize_chat_completions_url(
            optional_env("DEEPSEEK_API_URL")
                .or_else(|| optional_env("DEEPSEEK_BASE_URL"))
                .as_deref(),
            "https://api.deepseek.com/chat/completions",
        );

        Ok(Self {
            host: env_or_default("HOST", "0.0.0.0"),
            port: parse_env_u16("PORT", 3000)?,

            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),
            static_root: optional_env("STATIC_ROOT").map(PathBuf::from),
            reports_dir: PathBuf::from(env_or_default("REPORTS_DIR", "./reports-archive")),
            system_prompt_path: PathBuf::from(env_or_default(
                "SYSTEM_PROMPT_PATH",
                "./config/system-prompt.txt",
            )),

            jwt_secret: required_env("JWT_SECRET")?,
            default_admin_username: optional_env("DEFAULT_ADMIN_USERNAME"),
            default_admin_password: optional_env("DEFAULT_ADMIN_PASSWORD"),
            default_admin_role: env_or_default("DEFAULT_ADMIN_ROLE", "super_admin"),

            chat_api_key,
            chat_api_url: env_or_default(
                "QWEN_API_URL",
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            ),
            chat_model: env_or_default("QWEN_MODEL", "qwen-plus"),

            weekly_api_key,
            weekly_api_url,
            weekly_model: env_or_default("DEEPSEEK_MODEL", "deepseek-chat"),
            weekly_keyword_count: parse_env_usize("WEEKLY_KEYWORDS_COUNT", 30)?.clamp(5, 80),
            weekly_run_hour: parse_env_u32("WEEKLY_KEYWORDS_RUN_HOUR", 8)?.min(23),
            weekly_run_minute: parse_env_u32("WEEKLY_KEYWORDS_RUN_MINUTE", 0)?.min(59),
            weekly_model_timeout: Duration::from_millis(parse_env_u64(
                "WEEKLY_KEYWORDS_MODEL_TIMEOUT_MS",
                25_000,
            )?),
            weekly_run_on_startup: parse_env_bool("WEEKLY_KEYWORDS_RUN_ON_STARTUP", false)?,

            rate_limit_max_calls: parse_env_usize("RATE_LIMIT_MAX_CALLS", 10)?,
            rate_limit_window: Duration::from_secs(parse_env_u64("RATE_LIMIT_WINDOW_SECS", 3600)?),
            rate_limit_ban_duration: Duration::from_secs(parse_env_u64(
                "RATE_LIMIT_BAN_SECS",
                86_400,
            )?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "JWT_SECRET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.rate_limit_max_calls == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_MAX_CALLS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "RATE_LIMIT_WINDOW_SECS".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding per-date daily archive files.
    #[must_use]
    pub fn daily_archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive").join("daily")
    }
}

/// Accept either a full chat-completions URL or a bare API base URL.
fn normalize_chat_completions_url(value: Option<&str>, fallback: &str) -> String {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback.to_string();
    };
    let trimmed = raw.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
