// Connection manager
// Owns the connection lifecycle: connect, receive loop supervision, fixed-interval retry

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decoder::{Framing, StreamDecoder};
use super::transport::{BoxedStream, Transport};
use crate::constants::{CONNECTION_RETRY_INTERVAL_SECS, MAX_RECORD_LEN, READ_BUFFER_SIZE};
use crate::fix::PositionFix;

/// Lifecycle of the link to the position server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Called for every record decoded on the current generation.
///
/// Runs on the receive loop while the connection gate is held, so it must not
/// block and must not call back into the `ConnectionManager`.
pub type RecordHandler = Arc<dyn Fn(PositionFix) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Fixed delay before retrying after any failure
    pub retry_interval: Duration,
    pub framing: Framing,
    pub max_record_len: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            retry_interval: Duration::from_secs_f64(CONNECTION_RETRY_INTERVAL_SECS),
            framing: Framing::default(),
            max_record_len: MAX_RECORD_LEN,
        }
    }
}

/// Counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub connects: u64,
    pub failures: u64,
    pub records: u64,
    pub corrupt_records: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    connects: AtomicU64,
    failures: AtomicU64,
    records: AtomicU64,
    corrupt_records: AtomicU64,
}

/// Serializes state transitions and record delivery.
struct Gate {
    generation: u64,
    shut_down: bool,
}

#[derive(Default)]
struct Tasks {
    /// Pending attempt, possibly still sleeping out the retry interval
    attempt: Option<JoinHandle<()>>,
    receive: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    handler: RecordHandler,
    /// Held from the start of an attempt until it connects, through any retry wait
    connecting: AtomicBool,
    gate: Mutex<Gate>,
    tasks: Mutex<Tasks>,
    state_tx: watch::Sender<ConnectionState>,
    counters: Counters,
}

/// Keeps one live connection to the position server and feeds decoded records
/// to a handler.
///
/// Every connect attempt starts a new generation. Receive loops and attempts
/// from older generations are aborted, and if one still gets to run it sees the
/// generation mismatch and exits without delivering or changing state.
///
/// All methods must be called from within a tokio runtime.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, options: ConnectionOptions, handler: RecordHandler) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            inner: Arc::new(Inner {
                transport,
                options,
                handler,
                connecting: AtomicBool::new(false),
                gate: Mutex::new(Gate {
                    generation: 0,
                    shut_down: false,
                }),
                tasks: Mutex::new(Tasks::default()),
                state_tx,
                counters: Counters::default(),
            }),
        }
    }

    /// Start a connection attempt.
    ///
    /// Returns false and does nothing if an attempt is already in flight
    /// (including a scheduled retry) or the manager has been shut down.
    /// Calling this while connected replaces the current connection.
    pub fn connect(&self) -> bool {
        if self.inner.gate().shut_down {
            return false;
        }
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Connect request ignored, attempt already in flight");
            return false;
        }
        self.inner.spawn_attempt(Duration::ZERO);
        true
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub fn disconnect(&self) {
        self.inner.stop(false);
    }

    /// Permanent disconnect. No record is delivered after this returns and
    /// later `connect` calls are ignored.
    pub fn shutdown(&self) {
        self.inner.stop(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.gate().shut_down
    }

    /// Advances on every attempt and on every disconnect.
    pub fn generation(&self) -> u64 {
        self.inner.gate().generation
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn endpoint(&self) -> String {
        self.inner.transport.endpoint()
    }

    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            attempts: c.attempts.load(Ordering::Relaxed),
            connects: c.connects.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            records: c.records.load(Ordering::Relaxed),
            corrupt_records: c.corrupt_records.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Tasks hold their own Arc<Inner>; stop them explicitly
        self.inner.stop(true);
    }
}

impl Inner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            debug!("Connection state {:?} -> {:?}", old, state);
        }
    }

    /// Caller must hold the `connecting` guard.
    fn spawn_attempt(self: &Arc<Self>, delay: Duration) {
        let inner = Arc::clone(self);
        // Lock before spawning so a fast failure cannot store its retry handle first
        let mut tasks = self.tasks();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.attempt().await;
        });
        // Replacing a finished or running handle only detaches it
        tasks.attempt = Some(handle);
    }

    async fn attempt(self: Arc<Self>) {
        let generation = {
            let mut gate = self.gate();
            if gate.shut_down {
                return;
            }
            gate.generation += 1;
            self.set_state(ConnectionState::Connecting);
            gate.generation
        };
        if let Some(previous) = self.tasks().receive.take() {
            previous.abort();
        }

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        let endpoint = self.transport.endpoint();
        info!("Connecting to position server at {} (generation {})", endpoint, generation);

        match self.transport.connect().await {
            Ok(stream) => {
                let gate = self.gate();
                if gate.shut_down || gate.generation != generation {
                    debug!("Dropping connection for stale generation {}", generation);
                    return;
                }
                self.counters.connects.fetch_add(1, Ordering::Relaxed);
                self.set_state(ConnectionState::Connected);
                info!("Connected to position server at {}", endpoint);

                let inner = Arc::clone(&self);
                let handle = tokio::spawn(async move {
                    inner.receive_loop(generation, stream).await;
                });
                self.tasks().receive = Some(handle);
                self.connecting.store(false, Ordering::Release);
            }
            Err(e) => {
                warn!("Failed to connect to position server at {}: {}", endpoint, e);
                self.fail(generation, true);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, generation: u64, mut stream: BoxedStream) {
        let mut decoder = StreamDecoder::new(self.options.framing, self.options.max_record_len);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let result: io::Result<()> = loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            decoder.push(&buf[..n]);
            while let Some(record) = decoder.next_record() {
                match record {
                    Ok(fix) => {
                        if !self.deliver(generation, fix) {
                            debug!("Receive loop for generation {} is stale, exiting", generation);
                            return;
                        }
                    }
                    Err(e) => {
                        self.counters.corrupt_records.fetch_add(1, Ordering::Relaxed);
                        warn!("Discarding record from {}: {}", self.transport.endpoint(), e);
                        if let Some(hint) = e.framing_hint(self.options.framing) {
                            warn!("{}", hint);
                        }
                    }
                }
            }
        };

        drop(stream);
        match result {
            Ok(()) => info!("Connection closed by position server"),
            Err(e) => warn!("Error receiving position data: {}", e),
        }
        self.fail(generation, false);
    }

    fn deliver(&self, generation: u64, fix: PositionFix) -> bool {
        let gate = self.gate();
        if gate.shut_down || gate.generation != generation {
            return false;
        }
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        (self.handler)(fix);
        true
    }

    /// Transition to Disconnected and schedule exactly one retry, unless the
    /// generation has moved on.
    fn fail(self: &Arc<Self>, generation: u64, holds_guard: bool) {
        let gate = self.gate();
        if gate.shut_down || gate.generation != generation {
            return;
        }
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Disconnected);

        let acquired = holds_guard
            || self
                .connecting
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
        if !acquired {
            // Someone else's attempt is already under way
            return;
        }
        info!("Retrying connection in {:.1}s", self.options.retry_interval.as_secs_f64());
        // Scheduled under the gate so a concurrent stop() cannot miss it
        self.spawn_attempt(self.options.retry_interval);
        drop(gate);
    }

    fn stop(&self, permanent: bool) {
        let mut gate = self.gate();
        if permanent && !gate.shut_down {
            info!("Shutting down connection to {}", self.transport.endpoint());
        }
        gate.shut_down |= permanent;
        gate.generation += 1;
        {
            let mut tasks = self.tasks();
            if let Some(handle) = tasks.attempt.take() {
                handle.abort();
            }
            if let Some(handle) = tasks.receive.take() {
                handle.abort();
            }
        }
        self.connecting.store(false, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
    }
}
