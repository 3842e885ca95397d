// Position feed
// Composition root: drives the connection, keeps the last fix, notifies subscribers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::constants::SUBSCRIBER_QUEUE_CAPACITY;
use crate::fix::PositionFix;
use crate::interpolate::InterpolationError;
use crate::mapper::{MapProjector, TargetPoint};
use crate::net::connection::{ConnectionManager, ConnectionOptions, ConnectionState, ConnectionStats, RecordHandler};
use crate::net::transport::Transport;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub connection: ConnectionOptions,
    /// Fixes queued per subscriber before new ones are dropped for it
    pub queue_capacity: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        FeedOptions {
            connection: ConnectionOptions::default(),
            queue_capacity: SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Receiving end of a fix subscription.
///
/// Dropping it has the same effect as `PositionFeed::unsubscribe`.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<PositionFix>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next published fix, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<PositionFix> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PositionFix> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub published: u64,
    /// Decoded fixes rejected as invalid
    pub filtered: u64,
    /// Per-subscriber deliveries dropped because the queue was full
    pub dropped: u64,
    pub subscribers: usize,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: Vec<(SubscriptionId, mpsc::Sender<PositionFix>)>,
}

#[derive(Default)]
struct Latest {
    fix: Option<PositionFix>,
    updated_at: Option<SystemTime>,
}

struct Shared {
    latest: RwLock<Latest>,
    subscribers: Mutex<Subscribers>,
    queue_capacity: usize,
    published: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called from the receive loop; never waits on a subscriber.
    fn publish(&self, fix: PositionFix) {
        if !fix.is_plausible() {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Received invalid GPS fix (valid={}, lat={}, lon={}), not publishing",
                fix.valid, fix.latitude, fix.longitude
            );
            return;
        }

        {
            let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
            latest.fix = Some(fix);
            latest.updated_at = Some(SystemTime::now());
        }

        let mut subs = self.subscribers();
        subs.senders.retain(|(id, tx)| match tx.try_send(fix) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Subscriber {} is not keeping up, dropping fix", id.0);
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} went away", id.0);
                false
            }
        });
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            "GPS updated: lat={}, lon={}, alt={}",
            fix.latitude, fix.longitude, fix.altitude
        );
    }
}

/// Live feed of plausible GPS fixes.
///
/// Constructed once by the application and shared by reference (or `Arc`)
/// with every consumer.
pub struct PositionFeed {
    shared: Arc<Shared>,
    manager: ConnectionManager,
}

impl PositionFeed {
    pub fn new(transport: Arc<dyn Transport>, options: FeedOptions) -> Self {
        let shared = Arc::new(Shared {
            latest: RwLock::new(Latest::default()),
            subscribers: Mutex::new(Subscribers::default()),
            queue_capacity: options.queue_capacity.max(1),
            published: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let sink = Arc::clone(&shared);
        let handler: RecordHandler = Arc::new(move |fix| sink.publish(fix));
        let manager = ConnectionManager::new(transport, options.connection, handler);
        PositionFeed { shared, manager }
    }

    /// Begin connecting. Reconnects happen on their own after that.
    pub fn start(&self) -> bool {
        self.manager.connect()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.queue_capacity);
        let mut subs = self.shared.subscribers();
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.senders.push((id, tx));
        Subscription { id, rx }
    }

    /// Run `callback` for every published fix on its own task.
    ///
    /// The callback may call `unsubscribe` with its own id; it stops after the
    /// fixes already queued for it.
    pub fn on_fix<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(PositionFix) + Send + 'static,
    {
        let mut sub = self.subscribe();
        let id = sub.id();
        tokio::spawn(async move {
            while let Some(fix) = sub.recv().await {
                callback(fix);
            }
        });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.shared.subscribers();
        let before = subs.senders.len();
        subs.senders.retain(|(sid, _)| *sid != id);
        subs.senders.len() != before
    }

    /// Last plausible fix, however old.
    pub fn current_fix(&self) -> Option<PositionFix> {
        self.shared.latest.read().unwrap_or_else(|e| e.into_inner()).fix
    }

    pub fn last_update_time(&self) -> Option<SystemTime> {
        self.shared.latest.read().unwrap_or_else(|e| e.into_inner()).updated_at
    }

    /// Current fix projected onto the map, `None` before the first fix.
    pub fn current_mapped(&self, projector: &MapProjector) -> Option<Result<TargetPoint, InterpolationError>> {
        self.current_fix().map(|fix| projector.project_fix(&fix))
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    pub fn endpoint(&self) -> String {
        self.manager.endpoint()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.manager.stats()
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            published: self.shared.published.load(Ordering::Relaxed),
            filtered: self.shared.filtered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            subscribers: self.shared.subscribers().senders.len(),
        }
    }

    /// Close the connection and stop retrying. Nothing is published after
    /// this returns. Subscriptions are left in place.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
