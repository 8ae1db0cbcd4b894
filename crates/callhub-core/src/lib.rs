//! CallHub Core Library
//!
//! Foundational types shared by every CallHub crate:
//!
//! - Domain models (CallSession, provider events, destination owners,
//!   real-time channel messages)
//! - The call lifecycle transition rules
//! - Seam traits for persistence, directory lookup, dedupe and provider control
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::{AppConfig, EngineConfig};
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
