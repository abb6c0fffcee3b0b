//! Stream ingestion.
//!
//! Keeps one filtered subscription open against a [`StreamProvider`],
//! tracking exactly the enabled watched terms. When the term set changes the
//! old subscription is closed and a new one opened. Failed or dropped streams
//! are retried forever with capped exponential backoff. Matching events are
//! mapped to [`CapturedEvent`](crate::types::CapturedEvent) records and
//! handed to a bounded insert queue.
//!
//! ```text
//!            start                 Started
//!   Idle ──────────▶ Subscribing ─────────▶ Streaming
//!    ▲  ◀── no terms ─┘  │   ▲                 │
//!    │                   │   │ delay elapsed   │ disconnect / error /
//!    │        open fails ▼   │                 │ term change
//!    │               BackingOff ◀──────────────┘
//!    │
//!    └── term change
//! ```
//!
//! Any state moves to Stopped on [`IngestionManager::stop`].

mod backoff;
mod manager;
mod mapper;
mod provider;
mod queue;
mod slot;

pub use backoff::BackoffPolicy;
pub use manager::{IngestStats, IngestionManager, ResubscribeTrigger};
pub use mapper::map_event;
pub use provider::{
    InboundEvent, OpenRequest, SignalSink, StreamHandle, StreamProvider, StreamSignal,
};
pub use queue::{InsertQueue, QueueStats};
pub use slot::{ActiveSubscription, SubscriptionSlot};

/// Supplies the terms the subscription should track.
pub trait TermSource: Send + Sync + 'static {
    /// The currently enabled terms. Order and duplicates do not matter.
    fn enabled_terms(&self) -> crate::error::Result<Vec<String>>;
}

/// Externally visible state of the ingestion manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestState {
    /// Not subscribed; no enabled terms, or not started yet.
    Idle,
    /// Opening a subscription and waiting for the provider to start it.
    Subscribing,
    Streaming,
    /// Waiting out a reconnect delay.
    BackingOff,
    Stopped,
}
