//! CallHub Services
//!
//! The incoming call orchestration engine:
//!
//! - [`WebhookResponder`] answers provider callbacks within the deadline
//! - [`CallOrchestrator`] applies lifecycle transitions and their side effects
//! - [`CallResponseGateway`] takes accept/decline/ignore from user devices
//! - [`CallRecordStore`] is the idempotent session store
//! - [`ConnectionRegistry`] fans events out to a user's devices
//!
//! plus the ring timers, the control-document builder, the provider REST
//! client and the background task supervisor they share.

pub mod background;
pub mod call_store;
pub mod engine;
pub mod gateway;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod ring_timer;
pub mod twiml;
pub mod webhook;

pub use background::BackgroundTasks;
pub use call_store::{CallRecordStore, CallUpdate, Expectation};
pub use engine::{Engine, EngineCollaborators};
pub use gateway::CallResponseGateway;
pub use orchestrator::{CallOrchestrator, CallRoute};
pub use provider::{HttpProviderClient, NoopProviderControl};
pub use registry::ConnectionRegistry;
pub use retry::RetryPolicy;
pub use ring_timer::RingTimers;
pub use twiml::{CallbackUrls, ControlDocument};
pub use webhook::WebhookResponder;
