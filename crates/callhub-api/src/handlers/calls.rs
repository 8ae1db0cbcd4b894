//! Call handlers
//!
//! The synchronous decision endpoint and the owner's call history.

use crate::dto::{ApiResponse, CallResponse, PaginationParams, RespondRequest, RespondResult};
use actix_web::{web, HttpResponse};
use callhub_auth::AuthenticatedUser;
use callhub_core::AppError;
use callhub_services::Engine;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Accept, decline or ignore a ringing call
///
/// POST /api/v1/calls/{call_id}/respond
#[instrument(skip(engine, user, req), fields(user_id = %user.user_id))]
pub async fn respond_to_call(
    engine: web::Data<Engine>,
    user: AuthenticatedUser,
    path: web::Path<String>,
    req: web::Json<RespondRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Respond request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    let action = req.action()?;
    let call_id = path.into_inner();

    let result = engine.gateway.respond(&call_id, &user.user_id, action).await;
    let result = RespondResult::from_gateway(&call_id, result)?;
    info!(call_id = %call_id, %action, outcome = ?result.outcome, "Call decision");

    let message = result.message.clone();
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(result, message)))
}

/// List the caller's call history, newest first
///
/// GET /api/v1/calls
#[instrument(skip(engine, user), fields(user_id = %user.user_id))]
pub async fn list_calls(
    engine: web::Data<Engine>,
    user: AuthenticatedUser,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    query.validate()?;
    debug!(page = query.page, per_page = query.per_page, "Listing calls");

    let (sessions, total) = engine
        .store
        .history(&user.user_id, query.limit(), query.offset())
        .await?;
    let calls: Vec<CallResponse> = sessions.into_iter().map(CallResponse::from).collect();

    Ok(HttpResponse::Ok().json(query.paginate(calls, total)))
}

/// Get one of the caller's calls
///
/// GET /api/v1/calls/{call_id}
#[instrument(skip(engine, user), fields(user_id = %user.user_id))]
pub async fn get_call(
    engine: web::Data<Engine>,
    user: AuthenticatedUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();

    match engine.store.get(&call_id).await? {
        Some(session) if session.is_owned_by(&user.user_id) => {
            Ok(HttpResponse::Ok().json(ApiResponse::success(CallResponse::from(session))))
        }
        _ => Err(AppError::NotFound(format!("Call {} not found", call_id))),
    }
}

/// Configure call routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls")
            .route("", web::get().to(list_calls))
            .route("/{call_id}", web::get().to(get_call))
            .route("/{call_id}/respond", web::post().to(respond_to_call)),
    );
}
