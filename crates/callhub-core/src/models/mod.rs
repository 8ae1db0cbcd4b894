//! Domain models for CallHub
//!
//! This module contains the core domain models shared by the engine,
//! persistence and API layers.

pub mod call;
pub mod channel;
pub mod dedupe;
pub mod destination;
pub mod event;

pub use call::{CallSession, CallStatus, HandledBy, Transition, TransitionOutcome};
pub use channel::{ClientMessage, ResponseAction, ResponseOutcome, ServerEvent};
pub use dedupe::DedupeKey;
pub use destination::DestinationOwner;
pub use event::{
    DialStatus, ProviderCallStatus, ProviderEvent, ProviderEventKind, QueueResult, WebhookFields,
    WebhookKind,
};
