//! API layer for CallHub
//!
//! HTTP surfaces over the orchestration engine: provider webhooks, the
//! user decision endpoint, call history, health and the real-time duplex
//! channel.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

pub use dto::{ApiResponse, PaginationParams};

pub use handlers::{configure_calls, configure_health, configure_webhooks, ws_handler};
