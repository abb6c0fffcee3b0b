//! The ingestion manager and its worker loop.

use super::backoff::BackoffPolicy;
use super::mapper::map_event;
use super::provider::{Envelope, OpenRequest, SignalSink, StreamProvider, StreamSignal};
use super::queue::{InsertQueue, QueueStats};
use super::slot::{ActiveSubscription, SubscriptionSlot};
use super::{IngestState, TermSource};
use crate::config::{IngestConfig, ProviderCredentials};
use crate::error::IngestError;
use crate::events::CapturedEventStore;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Messages from the outside world to the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Control {
    Resubscribe,
    Stop,
}

/// Sender half of the running worker's control channel. Each `start()`
/// installs a fresh channel; `stop()` takes it out.
type ControlSlot = Arc<Mutex<Option<Sender<Control>>>>;

/// Cheap handle that asks the manager to re-read the enabled terms and
/// reopen the stream.
#[derive(Clone)]
pub struct ResubscribeTrigger {
    control: ControlSlot,
}

impl ResubscribeTrigger {
    /// Request a fresh subscription. A no-op while the manager is stopped.
    pub fn fire(&self) {
        if let Some(sender) = self.control.lock().as_ref() {
            let _ = sender.send(Control::Resubscribe);
        }
    }

    /// A trigger not connected to any manager, with the receiving end.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<Control>) {
        let (sender, receiver) = unbounded();
        let trigger = Self {
            control: Arc::new(Mutex::new(Some(sender))),
        };
        (trigger, receiver)
    }
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    open_failures: AtomicU64,
    backoffs: AtomicU64,
    events_received: AtomicU64,
    mapping_failures: AtomicU64,
    stale_signals: AtomicU64,
    signals_dropped: Arc<AtomicU64>,
}

/// Point-in-time ingestion counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Subscriptions successfully opened.
    pub opens: u64,
    pub open_failures: u64,
    /// Entries into the BackingOff state.
    pub backoffs: u64,
    pub events_received: u64,
    pub mapping_failures: u64,
    /// Signals ignored because they came from a superseded subscription.
    pub stale_signals: u64,
    /// Signals lost because the worker's buffer was full.
    pub signals_dropped: u64,
}

/// State visible to both the manager handle and its worker.
struct Shared {
    state: RwLock<IngestState>,
    counters: Counters,
    next_generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: IngestState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "ingest state change");
            *current = state;
        }
    }
}

/// Owns the lifecycle of the filtered stream subscription.
///
/// The state machine runs on one worker thread started by
/// [`IngestionManager::start`]. Keyword changes reach it through a
/// [`ResubscribeTrigger`]. Provider events reach it through a bounded
/// signal channel; lifecycle signals through an unbounded one, so a flood of
/// events can never hide a disconnect. Captured events go to a bounded
/// insert queue so a slow store never blocks the stream.
pub struct IngestionManager {
    credentials: ProviderCredentials,
    backoff: BackoffPolicy,
    provider: Arc<dyn StreamProvider>,
    terms: Arc<dyn TermSource>,
    queue: Arc<InsertQueue>,
    slot: Arc<SubscriptionSlot>,
    shared: Arc<Shared>,
    control: ControlSlot,
    signal_tx: Sender<Envelope>,
    signal_rx: Receiver<Envelope>,
    lifecycle_tx: Sender<Envelope>,
    lifecycle_rx: Receiver<Envelope>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionManager {
    /// Validate `config` and build a manager in the Idle state.
    ///
    /// Configuration errors are reported here and nowhere else.
    pub fn new(
        config: IngestConfig,
        provider: Arc<dyn StreamProvider>,
        terms: Arc<dyn TermSource>,
        events: CapturedEventStore,
    ) -> Result<Self, IngestError> {
        config.validate()?;

        let queue = InsertQueue::spawn(events, config.queues.insert_capacity)
            .map_err(IngestError::Spawn)?;
        let (signal_tx, signal_rx) = bounded(config.queues.signal_capacity);
        let (lifecycle_tx, lifecycle_rx) = unbounded();

        Ok(Self {
            credentials: config.credentials,
            backoff: BackoffPolicy::from_config(&config.backoff),
            provider,
            terms,
            queue: Arc::new(queue),
            slot: Arc::new(SubscriptionSlot::new()),
            shared: Arc::new(Shared {
                state: RwLock::new(IngestState::Idle),
                counters: Counters::default(),
                next_generation: AtomicU64::new(0),
            }),
            control: Arc::new(Mutex::new(None)),
            signal_tx,
            signal_rx,
            lifecycle_tx,
            lifecycle_rx,
            worker: Mutex::new(None),
        })
    }

    /// Start the worker. It immediately reads the enabled terms and
    /// subscribes.
    pub fn start(&self) -> Result<(), IngestError> {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if !handle.is_finished() {
                *worker = Some(handle);
                return Err(IngestError::AlreadyRunning);
            }
            let _ = handle.join();
        }

        // A fresh channel per run: nothing sent to an earlier worker can
        // reach this one.
        let (control_tx, control_rx) = unbounded();

        let runner = Worker {
            credentials: self.credentials.clone(),
            backoff: self.backoff,
            provider: Arc::clone(&self.provider),
            terms: Arc::clone(&self.terms),
            queue: Arc::clone(&self.queue),
            slot: Arc::clone(&self.slot),
            shared: Arc::clone(&self.shared),
            control_rx,
            signal_tx: self.signal_tx.clone(),
            signal_rx: self.signal_rx.clone(),
            lifecycle_tx: self.lifecycle_tx.clone(),
            lifecycle_rx: self.lifecycle_rx.clone(),
            generation: None,
            attempt: 0,
        };

        *self.control.lock() = Some(control_tx);
        self.shared.set_state(IngestState::Subscribing);
        let handle = std::thread::Builder::new()
            .name("termwatch-ingest".into())
            .spawn(move || runner.run())
            .map_err(|e| {
                self.control.lock().take();
                self.shared.set_state(IngestState::Stopped);
                IngestError::Spawn(e)
            })?;
        *worker = Some(handle);

        tracing::info!("ingestion started");
        Ok(())
    }

    /// Stop streaming: close the subscription, stop consuming signals and
    /// move to Stopped. Events already queued for insertion may or may not
    /// be written.
    pub fn stop(&self) {
        // Held until the worker has exited, so a concurrent start() waits.
        let mut worker = self.worker.lock();
        let control = self.control.lock().take();
        if let Some(handle) = worker.take() {
            if let Some(control) = control {
                let _ = control.send(Control::Stop);
            }
            let _ = handle.join();
            tracing::info!("ingestion stopped");
        }
        self.slot.clear();
        self.shared.set_state(IngestState::Stopped);
    }

    /// Ask the worker to re-read terms and reopen the stream.
    pub fn resubscribe(&self) {
        self.trigger().fire();
    }

    pub fn trigger(&self) -> ResubscribeTrigger {
        ResubscribeTrigger {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> IngestState {
        *self.shared.state.read()
    }

    /// Terms tracked by the live subscription, if one is open.
    pub fn current_track(&self) -> Option<Vec<String>> {
        self.slot.track()
    }

    pub fn stats(&self) -> IngestStats {
        let c = &self.shared.counters;
        IngestStats {
            opens: c.opens.load(Ordering::Relaxed),
            open_failures: c.open_failures.load(Ordering::Relaxed),
            backoffs: c.backoffs.load(Ordering::Relaxed),
            events_received: c.events_received.load(Ordering::Relaxed),
            mapping_failures: c.mapping_failures.load(Ordering::Relaxed),
            stale_signals: c.stale_signals.load(Ordering::Relaxed),
            signals_dropped: c.signals_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl Drop for IngestionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Internal phases. `AwaitingStart` is reported as Subscribing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Subscribing,
    AwaitingStart,
    Streaming,
    BackingOff,
    Stopped,
}

impl Phase {
    fn state(self) -> IngestState {
        match self {
            Phase::Idle => IngestState::Idle,
            Phase::Subscribing | Phase::AwaitingStart => IngestState::Subscribing,
            Phase::Streaming => IngestState::Streaming,
            Phase::BackingOff => IngestState::BackingOff,
            Phase::Stopped => IngestState::Stopped,
        }
    }
}

/// What a provider signal means for the current phase.
enum SignalOutcome {
    Continue,
    Started,
    Failed,
}

struct Worker {
    credentials: ProviderCredentials,
    backoff: BackoffPolicy,
    provider: Arc<dyn StreamProvider>,
    terms: Arc<dyn TermSource>,
    queue: Arc<InsertQueue>,
    slot: Arc<SubscriptionSlot>,
    shared: Arc<Shared>,
    control_rx: Receiver<Control>,
    signal_tx: Sender<Envelope>,
    signal_rx: Receiver<Envelope>,
    lifecycle_tx: Sender<Envelope>,
    lifecycle_rx: Receiver<Envelope>,
    /// Generation of the subscription this worker opened last.
    generation: Option<u64>,
    /// Consecutive failures since the last successful stream start.
    attempt: u32,
}

impl Worker {
    fn run(mut self) {
        let mut phase = Phase::Subscribing;
        loop {
            self.shared.set_state(phase.state());
            phase = match phase {
                Phase::Idle => self.idle(),
                Phase::Subscribing => self.subscribe(),
                Phase::AwaitingStart | Phase::Streaming => self.pump(phase),
                Phase::BackingOff => self.back_off(),
                Phase::Stopped => break,
            };
        }

        self.slot.clear();
        self.shared.set_state(IngestState::Stopped);
    }

    /// Nothing to track. Wait for a term change or a stop.
    fn idle(&mut self) -> Phase {
        match self.control_rx.recv() {
            Ok(Control::Resubscribe) => Phase::Subscribing,
            Ok(Control::Stop) | Err(_) => Phase::Stopped,
        }
    }

    /// Read the enabled terms, close the old subscription and open a new
    /// one.
    fn subscribe(&mut self) -> Phase {
        // Pending resubscribe requests are all satisfied by this pass.
        for control in self.control_rx.try_iter() {
            if control == Control::Stop {
                return Phase::Stopped;
            }
        }

        let mut track = match self.terms.enabled_terms() {
            Ok(terms) => terms,
            Err(e) => {
                tracing::error!(error = %e, "unable to read enabled terms");
                return Phase::BackingOff;
            }
        };
        track.sort();
        track.dedup();

        self.slot.clear();
        self.generation = None;

        if track.is_empty() {
            tracing::info!("no enabled terms, not subscribing");
            return Phase::Idle;
        }

        // Anything still buffered belongs to a closed subscription.
        let stale =
            (self.signal_rx.try_iter().count() + self.lifecycle_rx.try_iter().count()) as u64;
        if stale > 0 {
            self.shared
                .counters
                .stale_signals
                .fetch_add(stale, Ordering::Relaxed);
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = SignalSink::new(
            generation,
            self.signal_tx.clone(),
            self.lifecycle_tx.clone(),
            Arc::clone(&self.shared.counters.signals_dropped),
        );
        let request = OpenRequest {
            track: track.clone(),
            credentials: self.credentials.clone(),
            generation,
        };

        match self.provider.open(&request, sink) {
            Ok(handle) => {
                self.shared.counters.opens.fetch_add(1, Ordering::Relaxed);
                tracing::info!(generation, track = ?track, "subscribed to stream");
                self.slot
                    .replace(Some(ActiveSubscription::new(generation, track, handle)));
                self.generation = Some(generation);
                Phase::AwaitingStart
            }
            Err(e) => {
                self.shared
                    .counters
                    .open_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(generation, error = %e, "unable to open stream");
                Phase::BackingOff
            }
        }
    }

    /// Consume signals for the open subscription until something ends it.
    fn pump(&mut self, phase: Phase) -> Phase {
        loop {
            select! {
                recv(self.control_rx) -> control => match control {
                    Ok(Control::Resubscribe) => {
                        tracing::info!("term set changed, reopening stream");
                        self.attempt = 0;
                        return Phase::BackingOff;
                    }
                    Ok(Control::Stop) | Err(_) => return Phase::Stopped,
                },
                recv(self.lifecycle_rx) -> envelope => {
                    let Ok(envelope) = envelope else {
                        return Phase::Stopped;
                    };
                    if let Some(next) = self.dispatch(envelope, phase) {
                        return next;
                    }
                },
                recv(self.signal_rx) -> envelope => {
                    let Ok(envelope) = envelope else {
                        return Phase::Stopped;
                    };
                    if let Some(next) = self.dispatch(envelope, phase) {
                        return next;
                    }
                }
            }
        }
    }

    /// Handle one envelope. Returns the next phase if the signal ends the
    /// current one.
    fn dispatch(&mut self, envelope: Envelope, phase: Phase) -> Option<Phase> {
        if Some(envelope.generation) != self.generation {
            self.shared
                .counters
                .stale_signals
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match self.handle_signal(envelope.signal) {
            SignalOutcome::Continue => None,
            SignalOutcome::Started if phase == Phase::AwaitingStart => {
                self.attempt = 0;
                Some(Phase::Streaming)
            }
            SignalOutcome::Started => None,
            SignalOutcome::Failed => {
                self.drain_buffered();
                Some(Phase::BackingOff)
            }
        }
    }

    /// Process what the failed subscription buffered before it ended.
    fn drain_buffered(&mut self) {
        while let Ok(envelope) = self.signal_rx.try_recv() {
            if Some(envelope.generation) == self.generation {
                self.handle_signal(envelope.signal);
            } else {
                self.shared
                    .counters
                    .stale_signals
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn handle_signal(&mut self, signal: StreamSignal) -> SignalOutcome {
        match signal {
            StreamSignal::Started => {
                tracing::info!(generation = ?self.generation, "stream started");
                SignalOutcome::Started
            }
            StreamSignal::Event(event) => {
                self.shared
                    .counters
                    .events_received
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(provider_id = %event.provider_id, "received event");
                match map_event(event) {
                    Ok(captured) => {
                        self.queue.submit(captured);
                    }
                    Err(e) => {
                        self.shared
                            .counters
                            .mapping_failures
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "dropping unmappable event");
                    }
                }
                SignalOutcome::Continue
            }
            StreamSignal::KeepAlive => {
                tracing::trace!("keep-alive");
                SignalOutcome::Continue
            }
            StreamSignal::RateLimited { undelivered } => {
                tracing::warn!(undelivered, "provider rate limit notice");
                SignalOutcome::Continue
            }
            StreamSignal::FallingBehind { percent_full } => {
                tracing::warn!(percent_full, "provider reports consumer falling behind");
                SignalOutcome::Continue
            }
            StreamSignal::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "provider disconnected");
                SignalOutcome::Failed
            }
            StreamSignal::Error(e) => {
                tracing::error!(error = %e, "subscription error");
                SignalOutcome::Failed
            }
        }
    }

    /// Close the failed subscription and wait before trying again.
    fn back_off(&mut self) -> Phase {
        self.shared.counters.backoffs.fetch_add(1, Ordering::Relaxed);
        self.slot.clear();
        self.generation = None;

        let delay = self.backoff.delay(self.attempt);
        tracing::warn!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "waiting before resubscribing"
        );
        self.attempt = self.attempt.saturating_add(1);

        match self.control_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => Phase::Subscribing,
            Ok(Control::Resubscribe) => {
                self.attempt = 0;
                Phase::Subscribing
            }
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => Phase::Stopped,
        }
    }
}
