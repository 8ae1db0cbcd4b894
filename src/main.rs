//! CallHub server
//!
//! Inbound call orchestration backend: answers provider webhooks, rings the
//! owner's devices over WebSocket, and records every call attempt.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use callhub_api::{configure_calls, configure_health, configure_webhooks, ws_handler};
use callhub_auth::JwtService;
use callhub_cache::{MemoryDedupeCache, RedisDedupeCache};
use callhub_core::config::DedupeBackend;
use callhub_core::traits::{DedupeStore, ProviderControl};
use callhub_core::{AppConfig, AppError, AppResult};
use callhub_db::{create_pool, PgCallSessionRepository, PgDestinationDirectory};
use callhub_services::{
    CallbackUrls, Engine, EngineCollaborators, HttpProviderClient, NoopProviderControl,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for in-flight persistence and redirects
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_webhooks).service(
        web::scope("/api/v1")
            // Health check
            .configure(configure_health)
            // Call decisions and history
            .configure(configure_calls),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "callhub={},callhub_api={},callhub_services={},callhub_db={},callhub_cache={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

async fn dedupe_store(config: &AppConfig) -> AppResult<Arc<dyn DedupeStore>> {
    let ttl = config.engine.dedupe_ttl();
    match config.engine.dedupe_backend {
        DedupeBackend::Memory => {
            info!("Using in-process dedupe memory");
            Ok(Arc::new(MemoryDedupeCache::new(ttl)))
        }
        DedupeBackend::Redis => {
            let url = config.redis.url.as_deref().ok_or_else(|| {
                AppError::Config("redis.url is required for the redis dedupe backend".to_string())
            })?;
            let cache = RedisDedupeCache::new(url, ttl).await?;
            info!("Using Redis dedupe memory");
            Ok(Arc::new(cache))
        }
    }
}

fn provider_control(config: &AppConfig) -> AppResult<Arc<dyn ProviderControl>> {
    if config.provider.has_credentials() {
        Ok(Arc::new(HttpProviderClient::new(&config.provider)?))
    } else {
        warn!("Provider credentials missing; call redirects will only be logged");
        Ok(Arc::new(NoopProviderControl))
    }
}

async fn build_engine(config: &AppConfig) -> AppResult<Engine> {
    info!("Connecting to database...");
    let pool = create_pool(&config.database).await?;

    let collaborators = EngineCollaborators {
        repository: Arc::new(PgCallSessionRepository::new(pool.clone())),
        directory: Arc::new(PgDestinationDirectory::new(pool)),
        dedupe: dedupe_store(config).await?,
        provider: provider_control(config)?,
    };

    Ok(Engine::new(
        config.engine.clone(),
        CallbackUrls::new(&config.provider.public_base_url),
        config.provider.hold_music_url.clone(),
        collaborators,
    ))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting CallHub v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let engine = build_engine(&config).await.map_err(|e| {
        error!(error = %e, "Engine startup failed");
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;
    engine.start_maintenance();

    let jwt_service = JwtService::new(&config.auth.jwt_secret);

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    let cors_origins = config.server.cors_origins.clone();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let server_engine = engine.clone();
    let server = HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
                header::COOKIE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_engine.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
            // Real-time channel for user devices
            .route("/ws", web::get().to(ws_handler))
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run();

    let result = server.await;

    if engine.shutdown(SHUTDOWN_GRACE).await {
        info!("Background work drained");
    } else {
        warn!("Shutdown grace elapsed with background work still running");
    }

    result
}
