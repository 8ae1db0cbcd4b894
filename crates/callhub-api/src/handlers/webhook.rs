//! Provider webhook handlers
//!
//! Every provider callback lands on `POST /webhooks/voice/{kind}` as a form
//! post and is answered with a control document.

use actix_web::{web, HttpResponse};
use callhub_core::models::{ProviderEvent, WebhookFields, WebhookKind};
use callhub_core::AppError;
use callhub_services::twiml::CONTENT_TYPE;
use callhub_services::Engine;
use tracing::{debug, instrument, warn};

/// Answer a provider callback
///
/// POST /webhooks/voice/{kind}
#[instrument(skip(engine, form), fields(call_sid = form.call_sid.as_deref().unwrap_or("")))]
pub async fn provider_webhook(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    form: web::Form<WebhookFields>,
) -> Result<HttpResponse, AppError> {
    let kind: WebhookKind = path.parse().map_err(|e: AppError| {
        warn!(kind = %path, "Rejecting unknown webhook kind");
        e
    })?;

    let event = ProviderEvent::from_fields(kind, form.into_inner()).map_err(|e| {
        warn!(%kind, error = %e, "Malformed webhook payload");
        e
    })?;
    debug!(%kind, call_id = %event.call_id, "Webhook received");

    let document = engine.responder.respond(event).await;

    Ok(HttpResponse::Ok()
        .content_type(CONTENT_TYPE)
        .body(document.render()))
}

/// Configure webhook routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/webhooks/voice").route("/{kind}", web::post().to(provider_webhook)),
    );
}
