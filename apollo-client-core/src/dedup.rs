use crate::error::TransportError;
use crate::json_ext::canonical_json;
use crate::request::Request;
use crate::response::Response;
use crate::spec::OperationKind;
use crate::traits::Transport;
use futures::lock::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Identity of one deduplicatable fetch: the operation handle plus a
/// canonical fingerprint of its variables.
type DedupKey = (usize, String);

/// Collapses identical concurrent query fetches onto one network request.
///
/// The first submitter performs the fetch; everyone else subscribes to a
/// broadcast of its result. Mutations and subscriptions are never
/// deduplicated.
#[derive(Default)]
pub(crate) struct FetchDeduplicator {
    #[allow(clippy::type_complexity)]
    wait_map: Mutex<HashMap<DedupKey, broadcast::Sender<Result<Response, TransportError>>>>,
}

fn dedup_key(request: &Request) -> DedupKey {
    (
        Arc::as_ptr(&request.operation) as usize,
        canonical_json(&serde_json_bytes::Value::Object(request.variables.clone())),
    )
}

impl FetchDeduplicator {
    pub(crate) async fn fetch(
        &self,
        transport: &dyn Transport,
        request: &Request,
    ) -> Result<Response, TransportError> {
        if request.operation.kind != OperationKind::Query {
            return transport.send(request).await;
        }

        let key = dedup_key(request);
        loop {
            let mut locked_wait_map = self.wait_map.lock().await;
            match locked_wait_map.get(&key) {
                Some(waiter) => {
                    // Register interest in the in-flight fetch
                    let mut receiver = waiter.subscribe();
                    drop(locked_wait_map);

                    match receiver.recv().await {
                        Ok(value) => return value,
                        // the sender dropped without broadcasting, retry
                        Err(_) => continue,
                    }
                }
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    locked_wait_map.insert(key.clone(), tx.clone());
                    drop(locked_wait_map);

                    let value = transport.send(request).await;

                    {
                        let mut locked_wait_map = self.wait_map.lock().await;
                        locked_wait_map.remove(&key);
                    }

                    // Let our waiters know
                    tx.send(value.clone())
                        .map_err(|_| ())
                        .expect("there is always at least one receiver alive, the _rx guard; qed");

                    return value;
                }
            }
        }
    }
}
