use crate::cache::{
    read_operation, normalize, CacheKey, DependencyTracker, RecordBatch, RecordStore, WatchId,
    WriteOutcome,
};
use crate::config::ClientConfig;
use crate::dedup::FetchDeduplicator;
use crate::error::{ClientError, Error, NormalizationError, PersistenceError};
use crate::pipeline::RequestPipeline;
use crate::request::Request;
use crate::response::Response;
use crate::spec::OperationKind;
use crate::traits::{PersistentStore, Transport};
use crate::watch::{WatchRegistry, WATCH_CHANNEL_CAPACITY};
use derivative::Derivative;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The client core: one record store, one dependency tracker and one watch
/// registry behind a cheaply clonable handle.
///
/// There is no ambient instance; construct one per logical client and pass
/// it where it is needed.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct ClientInner {
    pub(crate) store: RecordStore,
    pub(crate) tracker: DependencyTracker,
    pub(crate) watches: WatchRegistry,
    #[derivative(Debug = "ignore")]
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: ClientConfig,
    #[derivative(Debug = "ignore")]
    pub(crate) dedup: FetchDeduplicator,
}

#[buildstructor::builder]
impl Client {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Option<ClientConfig>,
        backing: Option<Arc<dyn PersistentStore>>,
    ) -> Client {
        let store = match backing {
            Some(backing) => RecordStore::with_backing(backing),
            None => RecordStore::new(),
        };
        Client {
            inner: Arc::new(ClientInner {
                store,
                tracker: DependencyTracker::new(),
                watches: WatchRegistry::default(),
                transport,
                config: config.unwrap_or_default(),
                dedup: FetchDeduplicator::default(),
            }),
        }
    }
}

impl Client {
    /// Process one query or mutation to a single authoritative result.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// [`execute`](Client::execute) with cooperative cancellation: the
    /// operation stops at the next stage boundary once `token` is
    /// cancelled, never mid-write.
    pub async fn execute_with_cancellation(
        &self,
        request: Request,
        token: CancellationToken,
    ) -> Result<Response, ClientError> {
        let outcome = self.inner.pipeline().run(&request, &token).await?;
        if let Some(write) = &outcome.write {
            notify_affected(&self.inner, &write.merged_keys, None).await;
        }
        Ok(outcome.response)
    }

    /// Subscribe to an operation's materialized result: the initial value
    /// first, then a fresh value every time a store mutation touches a
    /// record the last materialization read.
    ///
    /// Subscription operations consume the transport's result stream, with
    /// one in-flight normalization per message. Dropping the returned
    /// stream tears the watch down.
    pub fn watch(&self, request: Request) -> WatchStream {
        let (sender, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let id = self
            .inner
            .watches
            .register(request.clone(), sender, cancel.clone());

        let inner = Arc::clone(&self.inner);
        match request.operation.kind {
            OperationKind::Subscription => {
                tokio::spawn(drive_subscription(inner, id, request, cancel.clone()));
            }
            _ => {
                tokio::spawn(start_query_watch(inner, id, request, cancel.clone()));
            }
        }

        WatchStream {
            id,
            receiver,
            cancel,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Seed or patch the store directly. The batch merges atomically and
    /// affected watches re-materialize exactly as for a network write.
    pub async fn write_records(&self, batch: RecordBatch) -> WriteOutcome {
        let outcome = self.inner.store.write(batch).await;
        notify_affected(&self.inner, &outcome.merged_keys, None).await;
        outcome
    }

    /// Remove one record. Watches that read it re-materialize and report
    /// its fields as missing.
    pub async fn evict(&self, key: &CacheKey) -> bool {
        match self.inner.store.evict(key).await {
            Some(outcome) => {
                notify_affected(&self.inner, &outcome.merged_keys, None).await;
                true
            }
            None => false,
        }
    }

    /// Drop every record. Watches are not notified: a cleared cache is a
    /// fresh start, not a mutation of what they read.
    pub async fn clear(&self) {
        self.inner.store.clear().await;
    }

    /// Load persisted records through the configured backing store, if any.
    pub async fn restore(&self) -> Result<usize, PersistenceError> {
        self.inner.store.restore().await
    }

    /// The store epoch: advances once per committed write batch.
    pub async fn epoch(&self) -> u64 {
        self.inner.store.epoch().await
    }
}

impl ClientInner {
    fn pipeline(&self) -> RequestPipeline<'_> {
        RequestPipeline {
            store: &self.store,
            transport: self.transport.as_ref(),
            dedup: &self.dedup,
            config: &self.config,
        }
    }

    fn teardown_watch(&self, id: WatchId) {
        if let Some(entry) = self.watches.remove(id) {
            entry.cancel.cancel();
        }
        self.tracker.unregister(id);
    }
}

/// Re-materialize every watch whose dependency set intersects `merged_keys`,
/// except the one that triggered the write. Runs against the post-merge
/// store state.
async fn notify_affected(
    inner: &Arc<ClientInner>,
    merged_keys: &[CacheKey],
    except: Option<WatchId>,
) {
    let affected = inner.tracker.affected(merged_keys);
    for id in affected {
        if Some(id) == except {
            continue;
        }
        refresh_watch(inner, id).await;
    }
}

/// Run one watch's selection against the current store, re-register its
/// dependency set and push the fresh value to its subscriber.
async fn refresh_watch(inner: &Arc<ClientInner>, id: WatchId) {
    let Some(entry) = inner.watches.get(id) else {
        return;
    };
    if entry.cancel.is_cancelled() {
        return;
    }
    let _gate = entry.gate.lock().await;

    let root = CacheKey::root_for(entry.request.operation.kind);
    let guard = inner.store.read().await;
    match read_operation(
        &entry.request.operation,
        &guard,
        &root,
        inner.config.max_read_depth,
    ) {
        Ok(read) => {
            drop(guard);
            inner.tracker.register(id, read.touched.clone());
            // a lagging subscriber loses intermediate values rather than
            // stalling the whole notification pass
            if let Err(mpsc::error::TrySendError::Full(_)) =
                entry.sender.try_send(read.into_response())
            {
                failfast_debug!("subscriber of {} is lagging, dropping an update", id);
            }
        }
        Err(err) => {
            drop(guard);
            failfast_error!("re-materialization of {} failed: {}", id, err);
            let _ = entry
                .sender
                .try_send(ClientError::Structural(err).to_response());
        }
    }
}

/// Initial run of a query/mutation watch: drive the pipeline once, emit the
/// interim and authoritative values, and register the first dependency set.
async fn start_query_watch(
    inner: Arc<ClientInner>,
    id: WatchId,
    request: Request,
    cancel: CancellationToken,
) {
    let Some(entry) = inner.watches.get(id) else {
        return;
    };
    let write = {
        let _gate = entry.gate.lock().await;
        match inner.pipeline().run(&request, &cancel).await {
            Ok(outcome) => {
                if let Some(interim) = outcome.interim {
                    let _ = entry.sender.send(interim).await;
                }
                inner.tracker.register(id, outcome.touched.clone());
                let _ = entry.sender.send(outcome.response).await;
                outcome.write
            }
            Err(ClientError::Cancelled) => None,
            Err(err) => {
                let _ = entry.sender.send(err.to_response()).await;
                None
            }
        }
    };

    if let Some(write) = write {
        notify_affected(&inner, &write.merged_keys, Some(id)).await;
    }
}

/// Consume a subscription's transport stream: normalize and commit each
/// message, push the materialized value to the subscriber and refresh every
/// other affected watch.
async fn drive_subscription(
    inner: Arc<ClientInner>,
    id: WatchId,
    request: Request,
    cancel: CancellationToken,
) {
    let Some(entry) = inner.watches.get(id) else {
        return;
    };
    let mut stream = match inner.transport.open_stream(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = entry
                .sender
                .send(ClientError::Transport(err).to_response())
                .await;
            inner.teardown_watch(id);
            return;
        }
    };

    let root = CacheKey::root_for(OperationKind::Subscription);
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let Some(message) = message else {
            break;
        };

        let _gate = entry.gate.lock().await;
        match message {
            Ok(mut response) => {
                let data =
                    std::mem::replace(&mut response.data, serde_json_bytes::Value::Null);
                let normalized = normalize(&request.operation, &inner.config.type_policies, data);
                let write = if normalized.batch.is_empty() {
                    None
                } else {
                    Some(inner.store.write(normalized.batch).await)
                };

                let guard = inner.store.read().await;
                match read_operation(
                    &request.operation,
                    &guard,
                    &root,
                    inner.config.max_read_depth,
                ) {
                    Ok(read) => {
                        drop(guard);
                        inner.tracker.register(id, read.touched.clone());
                        let mut errors = response.errors;
                        errors.extend(
                            normalized
                                .errors
                                .iter()
                                .map(NormalizationError::to_wire_error),
                        );
                        errors.extend(read.errors);
                        errors.extend(read.missing.iter().map(Error::missing_field));
                        // one in-flight normalization per message: the send
                        // awaits, applying backpressure to the stream
                        if entry
                            .sender
                            .send(Response {
                                data: read.data,
                                errors,
                                extensions: response.extensions,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        drop(guard);
                        failfast_error!("materializing a subscription message failed: {}", err);
                        let _ = entry
                            .sender
                            .send(ClientError::Structural(err).to_response())
                            .await;
                    }
                }

                if let Some(write) = write {
                    notify_affected(&inner, &write.merged_keys, Some(id)).await;
                }
            }
            Err(err) => {
                let _ = entry
                    .sender
                    .send(ClientError::Transport(err).to_response())
                    .await;
                break;
            }
        }
    }

    // releasing the stream closes the transport side; the store is left
    // untouched
    inner.teardown_watch(id);
}

/// A watch's result stream. Dropping it cancels the watch, releases its
/// transport resources and removes its dependency registration.
pub struct WatchStream {
    id: WatchId,
    receiver: mpsc::Receiver<Response>,
    cancel: CancellationToken,
    inner: Arc<ClientInner>,
}

impl WatchStream {
    /// The identity of this watch, mostly useful in traces.
    pub fn id(&self) -> u64 {
        self.id.0
    }
}

impl futures::Stream for WatchStream {
    type Item = Response;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.inner.teardown_watch(self.id);
    }
}
