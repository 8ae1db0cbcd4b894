//! Health check

use actix_web::{web, HttpResponse};
use callhub_services::Engine;
use serde_json::json;

/// GET /api/v1/health
pub async fn health_check(engine: web::Data<Engine>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "callhub",
        "version": env!("CARGO_PKG_VERSION"),
        "online_users": engine.online_users(),
        "active_sessions": engine.active_sessions(),
        "background_jobs": engine.background_jobs(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
