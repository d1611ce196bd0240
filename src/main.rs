//! Alerthub - Alert Management & Intelligence Layer
//! Mission: Every alert seen, deduplicated, understood, and delivered
//! Pipeline: ingest -> dedup -> inhibit -> silence -> classify -> filter -> fanout

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, Router};
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alerthub_backend::api::{routes, AppState};
use alerthub_backend::classify::ClassificationService;
use alerthub_backend::enrichment_mode::EnrichmentModeManager;
use alerthub_backend::metrics::PipelineMetrics;
use alerthub_backend::middleware::{
    rate_limit_middleware, request_logging, require_bearer, RateLimitConfig, RateLimiter,
};
use alerthub_backend::models::Config;
use alerthub_backend::pipeline::{
    ActiveAlertSet, AlertPipeline, Deduplicator, FilterEngine, InhibitionEngine, SilenceEngine,
};
use alerthub_backend::publish::{PublishCoordinator, PublishingModeManager, TargetDiscovery};
use alerthub_backend::rules::RulesFile;
use alerthub_backend::storage::HistoryStore;

const MAX_INGEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Alert management and intelligence layer.
#[derive(Debug, Parser)]
#[command(name = "alerthub", version)]
struct Cli {
    /// Listen port (overrides PORT).
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    /// History database path (overrides DB_PATH).
    #[arg(long, env = "DB_PATH", default_value = "alerthub_history.db")]
    db_path: String,
    /// Target descriptor file consumed by discovery.
    #[arg(long, env = "TARGETS_FILE")]
    targets_file: Option<String>,
    /// TOML file with filters, inhibition rules, and silences.
    #[arg(long, env = "RULES_FILE")]
    rules_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    config.port = cli.port;
    config.db_path = cli.db_path;
    config.discovery.targets_file = cli.targets_file.or(config.discovery.targets_file);
    config.rules_file = cli.rules_file.or(config.rules_file);
    let config = Arc::new(config);

    info!("🚀 Alerthub starting - alert intelligence layer");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;

    let store = Arc::new(HistoryStore::new(&config.db_path)?);
    info!("💾 Existing alerts in history: {}", store.len());

    let metrics = Arc::new(PipelineMetrics::new());

    // Suppression engines start from the rules file when one is configured.
    let rules = match &config.rules_file {
        Some(path) => match RulesFile::load(path) {
            Ok(rules) => {
                info!(
                    filters = rules.filters.len(),
                    inhibition = rules.inhibition.len(),
                    silences = rules.silences.len(),
                    "📜 Rules loaded from {}",
                    path
                );
                rules
            }
            Err(e) => {
                warn!(error = %e, "Rules file unreadable, starting with empty rule set");
                RulesFile::default()
            }
        },
        None => RulesFile::default(),
    };

    let active_set = Arc::new(ActiveAlertSet::new(store.clone()));
    let inhibition = Arc::new(InhibitionEngine::new(
        rules.inhibition.clone(),
        active_set.clone(),
        store.clone(),
        metrics.clone(),
    ));
    let silencing = Arc::new(SilenceEngine::new(rules.silence_rules(), metrics.clone()));
    let filters = FilterEngine::new(
        rules.filters.clone(),
        rules.default_action,
        config.filter_timezone_offset_hours,
        metrics.clone(),
    );

    let classifier = Arc::new(ClassificationService::new(
        config.classification.clone(),
        store.clone(),
        metrics.clone(),
    ));

    let discovery = Arc::new(TargetDiscovery::new(
        config.discovery.targets_file.clone(),
        config.discovery.label_selector.clone(),
    ));
    if let Err(e) = discovery.refresh() {
        warn!(error = %e, "Initial target discovery failed, starting in metrics-only mode");
    }

    let publishing_mode = Arc::new(PublishingModeManager::new(metrics.clone()));
    let coordinator = Arc::new(PublishCoordinator::new(
        config.publishing.clone(),
        discovery.clone(),
        publishing_mode,
        metrics.clone(),
        http_client,
    ));

    let enrichment_mode = Arc::new(EnrichmentModeManager::new(
        store.clone(),
        config.mode_refresh_interval,
    ));

    let pipeline = Arc::new(AlertPipeline::new(
        Arc::new(Deduplicator::new(store.clone(), metrics.clone())),
        inhibition,
        silencing,
        filters,
        classifier,
        coordinator,
        enrichment_mode.clone(),
        store.clone(),
    ));

    // Discovery loop: interval pull + refresh-now trigger.
    tokio::spawn(discovery.clone().run(config.discovery.refresh_interval));

    // Enrichment-mode cache refresh (<=30 s).
    {
        let mode = enrichment_mode.clone();
        let every = config.mode_refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                mode.refresh();
            }
        });
    }

    // Active-set reconcile against the shared tier.
    {
        let active = active_set.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(15));
            loop {
                ticker.tick().await;
                active.reconcile();
            }
        });
    }

    // Rules hot-reload on the discovery cadence.
    if let Some(path) = config.rules_file.clone() {
        let pipeline = pipeline.clone();
        let metrics = metrics.clone();
        let tz = config.filter_timezone_offset_hours;
        let every = config.discovery.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match RulesFile::load(&path) {
                    Ok(rules) => {
                        pipeline.inhibition().set_rules(rules.inhibition.clone());
                        pipeline.silencing().set_silences(rules.silence_rules());
                        pipeline.set_filters(FilterEngine::new(
                            rules.filters.clone(),
                            rules.default_action,
                            tz,
                            metrics.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Rules reload failed, keeping current set"),
                }
            }
        });
    }

    // Keep the shared kv tier lean.
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(6 * 3600));
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now().timestamp() - 7 * 86_400;
                match store.kv_prune_before(cutoff) {
                    Ok(0) => {}
                    Ok(n) => info!("🧹 Pruned {n} stale cache entries"),
                    Err(e) => warn!(error = %e, "Cache prune failed"),
                }
            }
        });
    }

    let app_state = AppState {
        pipeline,
        discovery,
        metrics,
        config: config.clone(),
    };

    let rate_limiter = RateLimiter::new(RateLimitConfig::default());
    let api = routes::api_router()
        .route_layer(axum_mw::from_fn_with_state(
            config.api_token.clone(),
            require_bearer,
        ))
        .route_layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let app = Router::new()
        .merge(routes::public_router())
        .nest("/api/v1", api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_INGEST_BODY_BYTES))
        .layer(axum_mw::from_fn(request_logging));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Initialize tracing with env-filter overrides.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alerthub_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
