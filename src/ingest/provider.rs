//! The upstream streaming provider seam.

use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::types::{Author, Engagement, Geo, Timestamp};
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An event pushed by the provider because it matched the filter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned identifier.
    pub provider_id: String,
    pub text: String,
    pub full_text: Option<String>,
    /// Terms matched by the event itself.
    pub matched_terms: Vec<String>,
    /// Terms matched by quoted or embedded content.
    pub quoted_matched_terms: Vec<String>,
    pub author: Author,
    pub geo: Geo,
    pub lang: Option<String>,
    pub created_at: Option<Timestamp>,
    pub engagement: Engagement,
    /// The payload exactly as received.
    pub raw: String,
}

/// Everything a provider can tell the ingestion manager.
#[derive(Clone, Debug)]
pub enum StreamSignal {
    /// The provider accepted the filter and started streaming.
    Started,
    /// A matching event.
    Event(InboundEvent),
    KeepAlive,
    /// Events were withheld because of rate limiting.
    RateLimited { undelivered: u64 },
    /// The consumer is not keeping up; the provider may disconnect.
    FallingBehind { percent_full: u8 },
    /// The provider closed the stream.
    Disconnected { reason: String },
    /// The stream failed.
    Error(ProviderError),
}

impl StreamSignal {
    /// Whether the signal changes the subscription's lifecycle. Lifecycle
    /// signals are never dropped, whatever the buffer state.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            StreamSignal::Started | StreamSignal::Disconnected { .. } | StreamSignal::Error(_)
        )
    }
}

/// A signal stamped with the generation of the subscription that sent it.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub generation: u64,
    pub signal: StreamSignal,
}

/// Where a provider delivers signals for one subscription.
///
/// Sending never blocks. Events and notices go through a bounded buffer and
/// are dropped and counted when it is full. Lifecycle signals (`Started`,
/// `Disconnected`, `Error`) use a separate unbounded channel and are always
/// delivered while the manager is alive.
#[derive(Clone)]
pub struct SignalSink {
    generation: u64,
    events: Sender<Envelope>,
    lifecycle: Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl SignalSink {
    pub(crate) fn new(
        generation: u64,
        events: Sender<Envelope>,
        lifecycle: Sender<Envelope>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            generation,
            events,
            lifecycle,
            dropped,
        }
    }

    /// Generation of the subscription this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a signal. Returns false if it was dropped.
    pub fn send(&self, signal: StreamSignal) -> bool {
        let lifecycle = signal.is_lifecycle();
        let envelope = Envelope {
            generation: self.generation,
            signal,
        };
        if lifecycle {
            return self.lifecycle.send(envelope).is_ok();
        }
        match self.events.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// What the manager asks the provider to open.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    /// Terms to track; never empty.
    pub track: Vec<String>,
    pub credentials: ProviderCredentials,
    pub generation: u64,
}

/// A live subscription. Closing it stops delivery.
pub trait StreamHandle: Send {
    fn close(&mut self);
}

/// An upstream push source of filtered events.
///
/// `open` may deliver signals from any thread, before or after it returns.
pub trait StreamProvider: Send + Sync + 'static {
    fn open(
        &self,
        request: &OpenRequest,
        sink: SignalSink,
    ) -> Result<Box<dyn StreamHandle>, ProviderError>;
}
