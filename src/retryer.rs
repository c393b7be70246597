use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use http::Response;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::body::ResponseBody;
use crate::config::RetryConfig;
use crate::error::Error;
use crate::executor::Executor;
use crate::observe::{RequestLogger, TracingLogger};
use crate::prepared::PreparedRequest;
use crate::retry::{
    BackoffStrategy, DefaultRetryPolicy, ExponentialBackoff, RetryAfterThrottle, RetryPolicy,
    RetryVerdict, ThrottlePolicy,
};
use crate::util::{instant_after, read_unpoisoned, write_unpoisoned};

/// Earliest instant at which any call sharing this state may send its next attempt.
///
/// Only ever moves forward.
#[derive(Debug, Default)]
pub struct SharedDeadline {
    next_try: RwLock<Option<Instant>>,
}

impl SharedDeadline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Instant> {
        *read_unpoisoned(&self.next_try)
    }

    /// Pushes the deadline to `now + delay` if that is later than the current one.
    /// Returns the deadline in effect afterwards.
    pub fn advance(&self, delay: Duration) -> Option<Instant> {
        if delay.is_zero() {
            return self.get();
        }
        let candidate = instant_after(delay);
        let mut next_try = write_unpoisoned(&self.next_try);
        match *next_try {
            Some(current) if current >= candidate => {}
            _ => *next_try = Some(candidate),
        }
        *next_try
    }
}

/// Retrying decorator around another [`Executor`].
///
/// All calls through one `Retryer` share a throttle deadline (advanced by the
/// [`ThrottlePolicy`]) and a logger; each call runs its own backoff sequence.
/// There is no attempt cap: the caller's deadline and cancellation bound a call.
pub struct Retryer {
    inner: Arc<dyn Executor>,
    shared: Arc<SharedDeadline>,
    backoff: Arc<dyn BackoffStrategy>,
    throttle: Arc<dyn ThrottlePolicy>,
    retry_policy: Arc<dyn RetryPolicy>,
    logger: Arc<dyn RequestLogger>,
    drain_limit: usize,
}

impl fmt::Debug for Retryer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Retryer")
            .field("next_try", &self.shared.get())
            .field("drain_limit", &self.drain_limit)
            .finish_non_exhaustive()
    }
}

impl Retryer {
    pub fn new(inner: impl Executor + 'static) -> Self {
        Self::builder(inner).build()
    }

    pub fn builder(inner: impl Executor + 'static) -> RetryerBuilder {
        RetryerBuilder::new(Arc::new(inner))
    }

    pub fn next_permitted_attempt(&self) -> Option<Instant> {
        self.shared.get()
    }

    fn next_try(&self, local: Option<Instant>) -> Option<Instant> {
        match (self.shared.get(), local) {
            (Some(shared), Some(local)) => Some(shared.max(local)),
            (shared, local) => shared.or(local),
        }
    }

    /// Blocks until both the shared and the local next-try instants have passed.
    async fn wait_turn(&self, request: &PreparedRequest, local: Option<Instant>) -> Result<(), Error> {
        let context = request.context();
        loop {
            context.check()?;
            let Some(next_try) = self.next_try(local) else {
                return Ok(());
            };
            let now = Instant::now();
            if next_try <= now {
                return Ok(());
            }
            if let Some(deadline) = context.deadline()
                && deadline < next_try
            {
                return Err(Error::DeadlineBeforeNextTry {
                    wait_ms: next_try.saturating_duration_since(now).as_millis(),
                });
            }
            context.sleep_until(next_try).await?;
        }
    }

    fn observe_close(&self, id: u64, response: Response<ResponseBody>) -> Response<ResponseBody> {
        let logger = Arc::clone(&self.logger);
        response.map(move |body| {
            body.with_close_hook(move |bytes_read| logger.log(id, None, &format!("close {bytes_read}")))
        })
    }

    fn throttle(&self, response: &Response<ResponseBody>) {
        let delay = self.throttle.next(response);
        if delay.is_zero() {
            return;
        }
        let next_try = self.shared.advance(delay);
        debug!(
            status = response.status().as_u16(),
            delay_ms = delay.as_millis() as u64,
            next_try_in_ms = next_try
                .map(|instant| instant.saturating_duration_since(Instant::now()).as_millis() as u64),
            "shared retry deadline advanced"
        );
    }

    async fn drain(&self, response: Response<ResponseBody>) {
        // The body is discarded; a failed drain only costs the connection.
        let _ = response.into_body().drain(self.drain_limit).await;
    }

    async fn run(
        &self,
        id: u64,
        mut request: PreparedRequest,
    ) -> Result<Response<ResponseBody>, Error> {
        let mut backoff = self.backoff.start();
        let mut local_next_try: Option<Instant> = None;
        let mut attempt = 0_usize;

        loop {
            self.wait_turn(&request, local_next_try).await?;

            request.context().check()?;
            let Some(attempt_request) = request.next_attempt() else {
                return Err(Error::BodyNotReplayable);
            };
            attempt += 1;

            let span = info_span!("lazyreq.attempt", request_id = id, attempt = attempt);
            let outcome = self
                .inner
                .execute(attempt_request)
                .instrument(span)
                .await
                .map(|response| self.observe_close(id, response));
            if let Ok(response) = &outcome {
                self.throttle(response);
            }

            match self.retry_policy.decide(outcome.as_ref()) {
                RetryVerdict::Return => return outcome,
                RetryVerdict::Fail(error) => {
                    if let Ok(response) = outcome {
                        self.drain(response).await;
                    }
                    return Err(error);
                }
                RetryVerdict::Retry(reported) => {
                    let delay = match &outcome {
                        Ok(response) => backoff.next(Some(response)),
                        Err(_) => backoff.next(None),
                    };
                    let message = match &outcome {
                        Ok(response) => format!("retry: {}", response.status()),
                        Err(_) => "retry: transport error".to_owned(),
                    };
                    let logged = reported.as_ref().or(outcome.as_ref().err());
                    warn!(
                        request_id = id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = logged.map(tracing::field::display),
                        "{message}"
                    );
                    self.logger.log(id, logged, &message);

                    if let Ok(response) = outcome {
                        self.drain(response).await;
                    }
                    local_next_try = Some(instant_after(delay));
                }
            }
        }
    }
}

#[async_trait]
impl Executor for Retryer {
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        let id = self.logger.next_id();
        let dump = request.snapshot()?;
        self.logger.log(id, None, &dump);

        let result = self.run(id, request).await;
        self.logger.log(id, result.as_ref().err(), "done");
        result
    }
}

/// Assembles a [`Retryer`]; every piece defaults to the stock policy.
pub struct RetryerBuilder {
    inner: Arc<dyn Executor>,
    shared: Option<Arc<SharedDeadline>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    throttle: Arc<dyn ThrottlePolicy>,
    retry_policy: Arc<dyn RetryPolicy>,
    logger: Arc<dyn RequestLogger>,
    config: RetryConfig,
}

impl fmt::Debug for RetryerBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RetryerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryerBuilder {
    fn new(inner: Arc<dyn Executor>) -> Self {
        Self {
            inner,
            shared: None,
            backoff: None,
            throttle: Arc::new(RetryAfterThrottle),
            retry_policy: Arc::new(DefaultRetryPolicy),
            logger: Arc::new(TracingLogger::new()),
            config: RetryConfig::standard(),
        }
    }

    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the exponential schedule derived from [`RetryConfig`].
    pub fn backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn throttle(mut self, throttle: impl ThrottlePolicy + 'static) -> Self {
        self.throttle = Arc::new(throttle);
        self
    }

    pub fn retry_policy(mut self, retry_policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(retry_policy);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn RequestLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Shares the throttle deadline with other engines instead of owning a fresh one.
    pub fn shared_deadline(mut self, shared: Arc<SharedDeadline>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn build(self) -> Retryer {
        let config = self.config;
        let backoff = self.backoff.unwrap_or_else(|| {
            let mut exponential = ExponentialBackoff::new(config.base_backoff());
            if let Some(max) = config.max_backoff() {
                exponential = exponential.with_max(max);
            }
            let strategy: Arc<dyn BackoffStrategy> = Arc::new(exponential);
            strategy
        });
        Retryer {
            inner: self.inner,
            shared: self.shared.unwrap_or_default(),
            backoff,
            throttle: self.throttle,
            retry_policy: self.retry_policy,
            logger: self.logger,
            drain_limit: self.config.drain_limit(),
        }
    }
}
