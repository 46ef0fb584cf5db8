//! Normalized object cache and request execution pipeline for a typed
//! GraphQL client.
//!
//! Responses are flattened into per-entity [`Record`]s held by a single
//! [`RecordStore`]; queries are answered by replaying their selection against
//! that store, and live watches are re-materialized whenever a write touches
//! one of the records they last read.

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod cache;
mod client;
mod config;
mod dedup;
mod error;
mod json_ext;
mod pipeline;
mod request;
mod response;
mod spec;
mod traits;
mod watch;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use json_ext::*;
pub use request::*;
pub use response::*;
pub use spec::*;
pub use traits::*;
