//! HTTP request handlers

pub mod calls;
pub mod health;
pub mod webhook;
pub mod ws;

pub use calls::configure as configure_calls;
pub use health::configure as configure_health;
pub use webhook::configure as configure_webhooks;
pub use ws::ws_handler;
