//! Registry notifications and their broadcast.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use strum::IntoStaticStr;
use tokio::sync::broadcast;
use tracing::trace;

use assetreg_core::{AssetIdentifier, AssetRecord};

/// Coalesced progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Containers discovered so far.
    pub total_found: u64,
    /// Containers applied to the index.
    pub processed: u64,
    /// Containers waiting on a type or on a full load.
    pub pending_load: u64,
}

/// A notification emitted on the designated thread.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum RegistryEvent {
    PathAdded(CompactString),
    PathRemoved(CompactString),
    AssetAdded(AssetRecord),
    AssetRemoved(AssetRecord),
    /// A record was replaced by newer data.
    AssetUpdated(AssetRecord),
    /// Disk data changed for a record held in memory; the in-memory record
    /// was kept.
    AssetUpdatedOnDisk(AssetRecord),
    DependenciesChanged(AssetIdentifier),
    /// Container has no embedded metadata and must be loaded to be indexed.
    NeedsLoad {
        package: CompactString,
        local: PathBuf,
    },
    ScanStarted,
    ScanEnded,
    Progress(ProgressUpdate),
    InitialSearchCompleted,
}

impl RegistryEvent {
    /// Variant name, for logging.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Notifications produced by one tick or mutation.
///
/// Ordered events come first, then the latest progress update, then the
/// completion flag.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventContext {
    events: Vec<RegistryEvent>,
    progress: Option<ProgressUpdate>,
    search_completed: bool,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an ordered event.
    pub fn push(&mut self, event: RegistryEvent) {
        self.events.push(event);
    }

    /// Record progress. Only the latest update is kept.
    pub fn set_progress(&mut self, progress: ProgressUpdate) {
        self.progress = Some(progress);
    }

    /// Flag the initial search as complete.
    pub fn set_search_completed(&mut self) {
        self.search_completed = true;
    }

    /// Whether nothing would be broadcast.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.progress.is_none() && !self.search_completed
    }

    /// Ordered events queued so far.
    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    /// Flatten into broadcast order.
    pub fn into_events(self) -> Vec<RegistryEvent> {
        let mut out = self.events;
        if let Some(progress) = self.progress {
            out.push(RegistryEvent::Progress(progress));
        }
        if self.search_completed {
            out.push(RegistryEvent::InitialSearchCompleted);
        }
        out
    }
}

/// Handle returned by [`Broadcaster::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

/// Fans events out to synchronous listeners and a broadcast channel.
pub struct Broadcaster {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    sender: broadcast::Sender<RegistryEvent>,
    next_id: AtomicU64,
}

impl Broadcaster {
    /// Create a broadcaster whose channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            listeners: RwLock::new(Vec::new()),
            sender,
            next_id: AtomicU64::new(0),
        }
    }

    /// Receive events through a channel.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    /// Register a synchronous listener.
    pub fn add_listener(&self, listener: impl Fn(&RegistryEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    /// Deliver every event of `context` in order. Returns the event count.
    ///
    /// Listeners are snapshotted first, so they may add or remove listeners
    /// without deadlocking.
    pub fn broadcast(&self, context: EventContext) -> usize {
        let events = context.into_events();
        if events.is_empty() {
            return 0;
        }
        let listeners: Vec<Listener> = self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for event in &events {
            trace!(event = event.name(), "Broadcasting");
            for listener in &listeners {
                listener(event);
            }
            // No subscribers is fine.
            let _ = self.sender.send(event.clone());
        }
        events.len()
    }
}

/// Contexts waiting for the designated thread, in production order.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    queue: Mutex<VecDeque<EventContext>>,
}

impl DeferredEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a context unless it is empty.
    pub fn push(&self, context: EventContext) {
        if !context.is_empty() {
            self.queue.lock().push_back(context);
        }
    }

    /// Take everything queued so far.
    pub fn take(&self) -> Vec<EventContext> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of queued contexts.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
