//! HTTP surface tests
//!
//! The handlers run against an engine wired with in-memory collaborators.

use actix_web::{http::StatusCode, test, web, App};
use callhub_api::{configure_calls, configure_health, configure_webhooks};
use callhub_auth::{Claims, JwtService};
use callhub_cache::MemoryDedupeCache;
use callhub_core::models::DestinationOwner;
use callhub_core::EngineConfig;
use callhub_services::memory::{CapturingProvider, InMemoryCallRecordRepository, StaticDirectory};
use callhub_services::{CallbackUrls, Engine, EngineCollaborators};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "test-secret";
const DESTINATION: &str = "+15550100";

fn engine() -> Engine {
    Engine::new(
        EngineConfig::default(),
        CallbackUrls::new("https://hooks.example.com"),
        None,
        EngineCollaborators {
            repository: Arc::new(InMemoryCallRecordRepository::new()),
            directory: Arc::new(
                StaticDirectory::new().with_owner(DestinationOwner::new(DESTINATION, "user-1")),
            ),
            dedupe: Arc::new(MemoryDedupeCache::new(Duration::from_secs(3600))),
            provider: Arc::new(CapturingProvider::new()),
        },
    )
}

/// Token as the session issuer would sign it
fn bearer(user_id: &str) -> (&'static str, String) {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + 3600,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    ("Authorization", format!("Bearer {}", token))
}

macro_rules! app {
    ($engine:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($engine.clone()))
                .app_data(web::Data::new(JwtService::new(SECRET)))
                .configure(configure_webhooks)
                .service(
                    web::scope("/api/v1")
                        .configure(configure_health)
                        .configure(configure_calls),
                ),
        )
        .await
    };
}

fn incoming(call_sid: &str) -> test::TestRequest {
    incoming_from(call_sid, "+15550001")
}

fn incoming_from(call_sid: &str, from: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/webhooks/voice/incoming")
        .set_form([
            ("CallSid", call_sid),
            ("From", from),
            ("To", DESTINATION),
            ("CallStatus", "ringing"),
        ])
}

#[actix_web::test]
async fn test_incoming_webhook_enqueues_owned_call() {
    let engine = engine();
    let app = app!(engine);

    let resp = test::call_service(&app, incoming("CA1").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "text/xml"
    );
    let body = test::read_body(resp).await;
    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains("<Enqueue"));
    assert!(body.contains("/webhooks/voice/queue-wait"));

    engine.settle().await;
    assert_eq!(engine.active_sessions(), 1);
}

#[actix_web::test]
async fn test_unowned_destination_gets_unavailable_document() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/webhooks/voice/incoming")
        .set_form([("CallSid", "CA2"), ("From", "+15550001"), ("To", "+15559999")])
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains("<Say>"));
    assert!(body.contains("<Hangup/>"));
}

#[actix_web::test]
async fn test_unknown_webhook_kind_is_rejected() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/webhooks/voice/ringback")
        .set_form([("CallSid", "CA1")])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unknown_event");
}

#[actix_web::test]
async fn test_webhook_without_call_sid_is_rejected() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/webhooks/voice/status")
        .set_form([("CallStatus", "completed")])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_respond_requires_authentication() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/calls/CA1/respond")
        .set_json(json!({"action": "accept"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_accept_then_view_call() {
    let engine = engine();
    let app = app!(engine);

    test::call_service(&app, incoming("CA3").to_request()).await;
    engine.settle().await;

    let req = test::TestRequest::post()
        .uri("/api/v1/calls/CA3/respond")
        .insert_header(bearer("user-1"))
        .set_json(json!({"action": "accept"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["outcome"], "accepted");
    assert_eq!(body["message"], "call accepted");

    let req = test::TestRequest::get()
        .uri("/api/v1/calls/CA3")
        .insert_header(bearer("user-1"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "answered");
    assert_eq!(body["data"]["isFinal"], false);

    // A second decision on the same call is stale
    let req = test::TestRequest::post()
        .uri("/api/v1/calls/CA3/respond")
        .insert_header(bearer("user-1"))
        .set_json(json!({"action": "decline"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["outcome"], "unavailable");
}

#[actix_web::test]
async fn test_other_users_cannot_see_or_answer_call() {
    let engine = engine();
    let app = app!(engine);

    test::call_service(&app, incoming("CA4").to_request()).await;
    engine.settle().await;

    let req = test::TestRequest::post()
        .uri("/api/v1/calls/CA4/respond")
        .insert_header(bearer("user-2"))
        .set_json(json!({"action": "accept"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["outcome"], "unavailable");

    let req = test::TestRequest::get()
        .uri("/api/v1/calls/CA4")
        .insert_header(bearer("user-2"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_invalid_action_is_bad_request() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/calls/CA1/respond")
        .insert_header(bearer("user-1"))
        .set_json(json!({"action": "snooze"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_call_history_is_paginated() {
    let engine = engine();
    let app = app!(engine);

    // Different callers, so none of them fold into another
    for (sid, from) in [("CA10", "+15550010"), ("CA11", "+15550011"), ("CA12", "+15550012")] {
        test::call_service(&app, incoming_from(sid, from).to_request()).await;
        engine.settle().await;
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/calls?page=1&per_page=2")
        .insert_header(bearer("user-1"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/calls?page=0")
        .insert_header(bearer("user-1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_health_reports_engine_counters() {
    let engine = engine();
    let app = app!(engine);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["online_users"], 0);
    assert_eq!(body["active_sessions"], 0);
}
