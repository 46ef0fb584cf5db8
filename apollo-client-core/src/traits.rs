use crate::cache::{CacheKey, Record, RecordBatch};
use crate::error::{PersistenceError, TransportError};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::pin::Pin;

/// A lazy, potentially infinite sequence of raw responses for one
/// subscription. Dropping the stream releases the underlying connection.
pub type TransportStream =
    Pin<Box<dyn futures::Stream<Item = Result<Response, TransportError>> + Send>>;

/// The wire capability supplied by a collaborator.
///
/// The pipeline only ever sees this trait: socket handling, wire formats and
/// reconnection policy all live behind it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// One request/response exchange.
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;

    /// Open a long-lived result stream for a subscription operation.
    async fn open_stream(&self, request: &Request) -> Result<TransportStream, TransportError>;
}

/// Optional durability for the record store: load once at start, flush every
/// committed batch. Absence means pure in-memory operation.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load(&self) -> Result<Vec<(CacheKey, Record)>, PersistenceError>;

    async fn flush(&self, batch: &RecordBatch) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::*;

    assert_obj_safe!(Transport);
    assert_obj_safe!(PersistentStore);
}
