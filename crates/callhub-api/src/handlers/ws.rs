//! Real-time duplex channel for user devices
//!
//! An authenticated device opens `/ws` and is registered with the
//! connection registry under its user. Engine events reach it through an
//! unbounded outbound queue; the device answers ringing calls with
//! `incoming_call_response` messages.

use crate::dto::RespondResult;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, Session};
use callhub_auth::AuthenticatedUser;
use callhub_core::models::{ClientMessage, ServerEvent};
use callhub_services::Engine;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade for an authenticated device
///
/// GET /ws
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    engine: web::Data<Engine>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    engine.registry.register(&user.user_id, connection_id, tx);

    info!(user_id = %user.user_id, %connection_id, "Device connected");

    let engine = engine.get_ref().clone();
    actix_web::rt::spawn(async move {
        ws_session(session, msg_stream, rx, engine, user.user_id, connection_id).await;
    });

    Ok(response)
}

async fn ws_session(
    mut session: Session,
    mut msg_stream: actix_ws::MessageStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    engine: Engine,
    user_id: String,
    connection_id: Uuid,
) {
    let mut ping_interval = interval(PING_INTERVAL);

    loop {
        tokio::select! {
            Some(msg) = msg_stream.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        let reply = handle_client_text(&engine, &user_id, &text).await;
                        if !send_event(&mut session, &reply).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        debug!(%connection_id, "Ignoring binary message");
                    }
                    Ok(Message::Ping(msg)) => {
                        if session.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(reason)) => {
                        info!(%connection_id, "Device closed connection: {:?}", reason);
                        break;
                    }
                    Ok(Message::Continuation(_)) => {}
                    Ok(Message::Nop) => {}
                    Err(e) => {
                        error!(%connection_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            Some(payload) = outbound.recv() => {
                if session.text(payload).await.is_err() {
                    warn!(%connection_id, "Failed to deliver event, closing connection");
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    break;
                }
            }

            else => break,
        }
    }

    engine.registry.unregister(connection_id);
    let _ = session.close(None).await;
    info!(user_id = %user_id, %connection_id, "Device disconnected");
}

/// Reply to one client message
pub(crate) async fn handle_client_text(engine: &Engine, user_id: &str, text: &str) -> ServerEvent {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Unrecognized client message");
            return ServerEvent::Error {
                message: format!("unrecognized message: {}", e),
            };
        }
    };

    match message {
        ClientMessage::Ping => ServerEvent::Pong,
        ClientMessage::IncomingCallResponse { call_id, action } => {
            let result = engine.gateway.respond(&call_id, user_id, action).await;
            match RespondResult::from_gateway(&call_id, result) {
                Ok(result) => result.into_event(),
                Err(e) => {
                    warn!(call_id = %call_id, error = %e, "Call decision failed");
                    ServerEvent::Error {
                        message: e.to_string(),
                    }
                }
            }
        }
    }
}

async fn send_event(session: &mut Session, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => session.text(json).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to encode event");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callhub_cache::MemoryDedupeCache;
    use callhub_core::models::{DestinationOwner, ResponseOutcome};
    use callhub_core::EngineConfig;
    use callhub_services::memory::{
        CapturingProvider, InMemoryCallRecordRepository, StaticDirectory,
    };
    use callhub_services::{CallbackUrls, EngineCollaborators};
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(
            EngineConfig::default(),
            CallbackUrls::new("https://hooks.example.com"),
            None,
            EngineCollaborators {
                repository: Arc::new(InMemoryCallRecordRepository::new()),
                directory: Arc::new(
                    StaticDirectory::new().with_owner(DestinationOwner::new("+15550100", "user-1")),
                ),
                dedupe: Arc::new(MemoryDedupeCache::new(Duration::from_secs(3600))),
                provider: Arc::new(CapturingProvider::new()),
            },
        )
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let engine = engine();
        let reply = handle_client_text(&engine, "user-1", r#"{"type":"ping"}"#).await;
        assert_eq!(reply, ServerEvent::Pong);
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error() {
        let engine = engine();
        let reply = handle_client_text(&engine, "user-1", "not json").await;
        assert!(matches!(reply, ServerEvent::Error { .. }));

        let reply = handle_client_text(&engine, "user-1", r#"{"type":"dial"}"#).await;
        assert!(matches!(reply, ServerEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_response_for_unknown_call_is_unavailable() {
        let engine = engine();
        let reply = handle_client_text(
            &engine,
            "user-1",
            r#"{"type":"incoming_call_response","callId":"CA404","action":"accept"}"#,
        )
        .await;
        assert_eq!(
            reply,
            ServerEvent::ResponseResult {
                call_id: "CA404".to_string(),
                outcome: ResponseOutcome::Unavailable,
                message: "call no longer available".to_string(),
            }
        );
    }
}
