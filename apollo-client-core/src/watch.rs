use crate::cache::WatchId;
use crate::request::Request;
use crate::response::Response;
use dashmap::DashMap;
use derivative::Derivative;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How many pending updates a watch subscriber may fall behind before
/// further updates are dropped rather than blocking the notification pass.
pub(crate) const WATCH_CHANNEL_CAPACITY: usize = 32;

/// One live watch: the operation it replays, the channel its subscriber
/// reads, and the per-watch gate serializing re-materialization against
/// start/stop.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct WatchEntry {
    pub(crate) request: Request,
    #[derivative(Debug = "ignore")]
    pub(crate) sender: mpsc::Sender<Response>,
    #[derivative(Debug = "ignore")]
    pub(crate) gate: tokio::sync::Mutex<()>,
    pub(crate) cancel: CancellationToken,
}

/// Registry of every active watch, keyed by watch id.
///
/// Mutated only by watch start/stop; the invalidation pass takes shared
/// references and serializes per watch through each entry's gate, never
/// through a global lock.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    entries: DashMap<WatchId, Arc<WatchEntry>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub(crate) fn register(
        &self,
        request: Request,
        sender: mpsc::Sender<Response>,
        cancel: CancellationToken,
    ) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            id,
            Arc::new(WatchEntry {
                request,
                sender,
                gate: tokio::sync::Mutex::new(()),
                cancel,
            }),
        );
        id
    }

    pub(crate) fn get(&self, id: WatchId) -> Option<Arc<WatchEntry>> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, id: WatchId) -> Option<Arc<WatchEntry>> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }
}
