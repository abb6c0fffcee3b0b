//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use termwatch::{
    IngestConfig, OpenRequest, ProviderCredentials, ProviderError, SignalSink, StreamHandle,
    StreamProvider, StreamSignal,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn credentials() -> ProviderCredentials {
    ProviderCredentials {
        consumer_key: "key".into(),
        consumer_secret: "secret".into(),
        access_token: "token".into(),
        access_token_secret: "token-secret".into(),
    }
}

/// Valid config with short reconnect delays.
pub fn config() -> IngestConfig {
    let mut config = IngestConfig::with_credentials(credentials());
    config.backoff.base_ms = 2;
    config.backoff.max_delay_ms = 50;
    config
}

pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// One `open` call as seen by the provider.
#[derive(Clone, Debug)]
pub struct OpenRecord {
    pub generation: u64,
    pub track: Vec<String>,
}

struct ScriptedHandle {
    open_now: Arc<AtomicUsize>,
    closed: bool,
}

impl StreamHandle for ScriptedHandle {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// In-process provider driven by the test.
///
/// Every successful open is recorded and, unless disabled, immediately
/// acknowledged with `Started`. The sink of each open is kept so tests can
/// push signals as the provider would.
pub struct ScriptedProvider {
    opens: Mutex<Vec<OpenRecord>>,
    sinks: Mutex<Vec<SignalSink>>,
    open_now: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    fail_next: AtomicUsize,
    burst: Mutex<Option<Vec<StreamSignal>>>,
    auto_start: bool,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_auto_start(true))
    }

    pub fn with_auto_start(auto_start: bool) -> Self {
        Self {
            opens: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            open_now: Arc::new(AtomicUsize::new(0)),
            max_open: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            burst: Mutex::new(None),
            auto_start,
        }
    }

    /// Reject the next `n` opens.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Signals pushed from inside the first successful open, before the
    /// manager starts consuming.
    pub fn burst_on_first_open(&self, signals: Vec<StreamSignal>) {
        *self.burst.lock() = Some(signals);
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    /// Subscriptions opened and not yet closed.
    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn last_sink(&self) -> SignalSink {
        self.sinks
            .lock()
            .last()
            .cloned()
            .expect("no subscription opened yet")
    }

    pub fn send(&self, signal: StreamSignal) -> bool {
        self.last_sink().send(signal)
    }
}

impl StreamProvider for ScriptedProvider {
    fn open(
        &self,
        request: &OpenRequest,
        sink: SignalSink,
    ) -> Result<Box<dyn StreamHandle>, ProviderError> {
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::Open("scripted failure".into()));
        }

        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.opens.lock().push(OpenRecord {
            generation: request.generation,
            track: request.track.clone(),
        });
        if self.auto_start {
            sink.send(StreamSignal::Started);
        }
        if let Some(burst) = self.burst.lock().take() {
            for signal in burst {
                sink.send(signal);
            }
        }
        self.sinks.lock().push(sink);

        Ok(Box::new(ScriptedHandle {
            open_now: Arc::clone(&self.open_now),
            closed: false,
        }))
    }
}
