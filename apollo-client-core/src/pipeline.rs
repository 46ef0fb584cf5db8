use crate::cache::{read_operation, CacheKey, RecordStore, WriteOutcome};
use crate::cache::normalize;
use crate::config::ClientConfig;
use crate::dedup::FetchDeduplicator;
use crate::error::{ClientError, Error, NormalizationError, TransportError};
use crate::json_ext::Object;
use crate::request::{CachePolicy, Request};
use crate::response::Response;
use crate::spec::OperationKind;
use crate::traits::Transport;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// What one completed pipeline run hands back to the client: the
/// caller-facing response, the keys the final materialization read, the
/// write outcome to feed the dependency tracker, and the interim cached
/// value under the cache-and-network policy.
pub(crate) struct PipelineOutcome {
    pub(crate) response: Response,
    pub(crate) touched: HashSet<CacheKey>,
    pub(crate) write: Option<WriteOutcome>,
    pub(crate) interim: Option<Response>,
}

/// The processing stages of one operation. Transitions happen in
/// [`RequestPipeline::run`]'s loop; cancellation is only honoured between
/// stages, so a write transaction that has begun always runs to completion.
enum State {
    CacheCheck,
    NetworkFetch {
        attempt: u32,
    },
    Normalizing {
        response: Response,
    },
    Completing {
        upstream_errors: Vec<Error>,
        extensions: Object,
        normalization_errors: Vec<NormalizationError>,
        write: Option<WriteOutcome>,
    },
}

/// Drives one operation from submission to result: cache read, network
/// fetch with bounded retry, normalization, cache write, and the final
/// authoritative read.
pub(crate) struct RequestPipeline<'a> {
    pub(crate) store: &'a RecordStore,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) dedup: &'a FetchDeduplicator,
    pub(crate) config: &'a ClientConfig,
}

impl RequestPipeline<'_> {
    #[tracing::instrument(skip_all, level = "trace")]
    pub(crate) async fn run(
        &self,
        request: &Request,
        token: &CancellationToken,
    ) -> Result<PipelineOutcome, ClientError> {
        if request.operation.kind == OperationKind::Subscription {
            return Err(ClientError::SubscriptionRequiresWatch);
        }

        let root = CacheKey::root_for(request.operation.kind);
        let mut interim = None;
        // mutations always reach the network: a cached mutation result is
        // not a substitute for performing the mutation
        let mut state = match request.cache_policy {
            CachePolicy::NetworkOnly => State::NetworkFetch { attempt: 0 },
            _ if request.operation.kind == OperationKind::Mutation => {
                State::NetworkFetch { attempt: 0 }
            }
            _ => State::CacheCheck,
        };

        loop {
            if token.is_cancelled() {
                tracing::trace!("operation cancelled at a stage boundary");
                return Err(ClientError::Cancelled);
            }

            state = match state {
                State::CacheCheck => {
                    let guard = self.store.read().await;
                    let read =
                        read_operation(&request.operation, &guard, &root, self.config.max_read_depth)?;
                    drop(guard);

                    let complete = read.is_complete();
                    match request.cache_policy {
                        CachePolicy::CacheOnly => {
                            let touched = read.touched.clone();
                            return Ok(PipelineOutcome {
                                response: read.into_response(),
                                touched,
                                write: None,
                                interim: None,
                            });
                        }
                        CachePolicy::CacheFirst if complete => {
                            tracing::trace!("cache satisfied the operation");
                            let touched = read.touched.clone();
                            return Ok(PipelineOutcome {
                                response: read.into_response(),
                                touched,
                                write: None,
                                interim: None,
                            });
                        }
                        CachePolicy::CacheAndNetwork => {
                            if complete {
                                interim = Some(read.into_response());
                            }
                            State::NetworkFetch { attempt: 0 }
                        }
                        _ => State::NetworkFetch { attempt: 0 },
                    }
                }

                State::NetworkFetch { attempt } => match self.fetch(request).await {
                    Ok(response) => State::Normalizing { response },
                    Err(err) if err.is_retryable()
                        && attempt + 1 < self.config.retry.max_attempts =>
                    {
                        let delay = self.config.retry.delay_for(attempt);
                        tracing::debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after transport error: {}",
                            err
                        );
                        tokio::time::sleep(delay).await;
                        State::NetworkFetch {
                            attempt: attempt + 1,
                        }
                    }
                    Err(err) => return Err(ClientError::Transport(err)),
                },

                State::Normalizing { mut response } => {
                    let data = std::mem::replace(&mut response.data, serde_json_bytes::Value::Null);
                    let normalized =
                        normalize(&request.operation, &self.config.type_policies, data);
                    // once the write transaction starts it commits fully
                    // before any cancellation is honoured
                    let write = if normalized.batch.is_empty() {
                        None
                    } else {
                        Some(self.store.write(normalized.batch).await)
                    };
                    State::Completing {
                        upstream_errors: response.errors,
                        extensions: response.extensions,
                        normalization_errors: normalized.errors,
                        write,
                    }
                }

                State::Completing {
                    upstream_errors,
                    extensions,
                    normalization_errors,
                    write,
                } => {
                    let guard = self.store.read().await;
                    let read =
                        read_operation(&request.operation, &guard, &root, self.config.max_read_depth)?;
                    drop(guard);

                    let touched = read.touched.clone();
                    let mut errors = upstream_errors;
                    errors.extend(
                        normalization_errors
                            .iter()
                            .map(NormalizationError::to_wire_error),
                    );
                    errors.extend(read.errors);
                    errors.extend(read.missing.iter().map(Error::missing_field));

                    return Ok(PipelineOutcome {
                        response: Response {
                            data: read.data,
                            errors,
                            extensions,
                        },
                        touched,
                        write,
                        interim,
                    });
                }
            };
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
        self.dedup.fetch(self.transport, request).await
    }
}
