use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use newsdesk::ai::{load_system_prompt, UpstreamConfig};
use newsdesk::archive::ArchiveManager;
use newsdesk::auth::hash_password;
use newsdesk::config::Config;
use newsdesk::jobs::weekly_keywords::{self, WeeklyKeywordsJob};
use newsdesk::models::{default_settings, Admin};
use newsdesk::security::{run_cleanup_worker, RateLimitPolicy, SecurityService};
use newsdesk::store::{write_json, DocumentStore, JsonFileStore};
use newsdesk::web::keywords_cache::KeywordsCache;
use newsdesk::web::{create_app, serve, AppState};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    config.validate().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.daily_archive_dir())
        .await
        .context("Failed to create data directories")?;

    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new(&config.data_dir));
    ensure_seed_data(store.as_ref(), &config).await?;

    let system_prompt = Arc::new(load_system_prompt(&config.system_prompt_path).await);
    let chat_upstream = Arc::new(UpstreamConfig {
        api_key: config.chat_api_key.clone(),
        api_url: config.chat_api_url.clone(),
        model: config.chat_model.clone(),
    });
    let weekly_upstream = UpstreamConfig {
        api_key: config.weekly_api_key.clone(),
        api_url: config.weekly_api_url.clone(),
        model: config.weekly_model.clone(),
    };

    let archive = ArchiveManager::new(store.clone(), config.data_dir.clone());
    let security = SecurityService::new(
        store.clone(),
        RateLimitPolicy {
            max_calls: config.rate_limit_max_calls,
            window: config.rate_limit_window,
            ban_duration: config.rate_limit_ban_duration,
        },
    );
    let weekly_job = WeeklyKeywordsJob::new(
        store.clone(),
        config.data_dir.clone(),
        weekly_upstream,
        system_prompt.as_ref().clone(),
        config.weekly_keyword_count,
        config.weekly_run_hour,
        config.weekly_run_minute,
        config.weekly_model_timeout,
    );

    let state = AppState {
        config: config.clone(),
        store,
        archive,
        security: security.clone(),
        keywords_cache: Arc::new(KeywordsCache::default()),
        chat_upstream,
        system_prompt,
        weekly_job: weekly_job.clone(),
        http: reqwest::Client::new(),
    };

    let shutdown = CancellationToken::new();
    let cleanup_handle = tokio::spawn(run_cleanup_worker(
        security,
        CLEANUP_INTERVAL,
        shutdown.clone(),
    ));
    let scheduler_handle = tokio::spawn(weekly_keywords::run_scheduler(
        weekly_job.clone(),
        shutdown.clone(),
    ));

    if config.weekly_run_on_startup {
        tokio::spawn(async move {
            match weekly_job.run_once(true).await {
                Ok(outcome) => info!(?outcome, "Startup keyword run finished"),
                Err(e) => {
                    error!("Startup keyword run failed: {e:#}");
                    weekly_job.record_failure(&e.to_string()).await;
                }
            }
        });
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let app = create_app(state);

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            server_shutdown.cancel();
        }
    });

    serve(app, addr, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = cleanup_handle.await;
    let _ = scheduler_handle.await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create the JSON documents the routes expect, without clobbering existing
/// data. The default admin is only seeded when no admins file exists at all.
async fn ensure_seed_data(store: &dyn DocumentStore, config: &Config) -> Result<()> {
    let now = Utc::now();
    for key in ["news", "keywords", "tools", "banned-ips", "api-calls", "visit-logs"] {
        if !store.exists(key).await {
            write_json(store, key, &serde_json::json!([]))
                .await
                .with_context(|| format!("Failed to seed {key}.json"))?;
        }
    }
    if !store.exists("settings").await {
        write_json(store, "settings", &default_settings(now))
            .await
            .context("Failed to seed settings.json")?;
    }

    if !store.exists("admins").await {
        match (&config.default_admin_username, &config.default_admin_password) {
            (Some(username), Some(password)) => {
                let admin = Admin {
                    id: 1,
                    username: username.clone(),
                    password_hash: hash_password(password)?,
                    role: config.default_admin_role.clone(),
                    created_at: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                };
                write_json(store, "admins", &vec![admin])
                    .await
                    .context("Failed to seed admins.json")?;
                info!(username, "Seeded default admin account");
            }
            _ => {
                warn!("No admin accounts exist and DEFAULT_ADMIN_USERNAME/PASSWORD are unset; admin login is unavailable");
            }
        }
    }
    Ok(())
}
