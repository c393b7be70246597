use std::time::Duration;

pub(crate) const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_DRAIN_LIMIT: usize = 4096;
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the retry engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    base_backoff: Duration,
    max_backoff: Option<Duration>,
    drain_limit: usize,
}

impl RetryConfig {
    pub fn standard() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: None,
            drain_limit: DEFAULT_DRAIN_LIMIT,
        }
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Upper bound on bytes discarded from a response that is not handed to the caller.
    pub fn with_drain_limit(mut self, drain_limit: usize) -> Self {
        self.drain_limit = drain_limit;
        self
    }

    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    pub fn max_backoff(&self) -> Option<Duration> {
        self.max_backoff
    }

    pub fn drain_limit(&self) -> usize {
        self.drain_limit
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}
