use crate::cache::TypePolicies;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Depth at which a self-referential selection is considered runaway.
pub const DEFAULT_MAX_READ_DEPTH: usize = 32;

/// Retry behaviour for retryable transport failures.
///
/// The first retry waits `delay`, each subsequent retry multiplies the wait
/// by `backoff_factor` up to `delay_max`. Set `backoff_factor` to 1 to make
/// retries regular.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct RetryOptions {
    /// Total attempts, the initial fetch included.
    #[builder(default = 3)]
    pub max_attempts: u32,

    /// Wait before the first retry.
    #[builder(default = Duration::from_millis(500))]
    pub delay: Duration,

    #[builder(default = 2)]
    pub backoff_factor: u32,

    /// Upper bound on any single wait.
    #[builder(default = Duration::from_secs(30))]
    pub delay_max: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryOptions {
    /// The wait before retrying after the given zero-based failed attempt.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt);
        self.delay.saturating_mul(factor).min(self.delay_max)
    }
}

/// Everything a client instance is configured with.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ClientConfig {
    /// Per-type identity policies for the normalizer.
    #[builder(default)]
    pub type_policies: TypePolicies,

    #[builder(default = DEFAULT_MAX_READ_DEPTH)]
    pub max_read_depth: usize,

    #[builder(default)]
    pub retry: RetryOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
