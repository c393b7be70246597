use std::time::{Duration, SystemTime};

use http::{Response, StatusCode};

use crate::body::ResponseBody;
use crate::config::DEFAULT_BASE_BACKOFF;
use crate::error::Error;
use crate::util::parse_retry_after;

const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Outcome of one attempt as seen by a [`RetryPolicy`].
pub type AttemptOutcome<'a> = Result<&'a Response<ResponseBody>, &'a Error>;

#[derive(Debug)]
pub enum RetryVerdict {
    /// Hand the outcome to the caller unchanged.
    Return,
    /// Stop and report this error; any response is drained first.
    Fail(Error),
    /// Try again after backoff; the error, if any, is what gets logged.
    Retry(Option<Error>),
}

impl RetryVerdict {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

pub trait RetryPolicy: Send + Sync {
    fn decide(&self, outcome: AttemptOutcome<'_>) -> RetryVerdict;
}

impl<F> RetryPolicy for F
where
    F: Fn(AttemptOutcome<'_>) -> RetryVerdict + Send + Sync,
{
    fn decide(&self, outcome: AttemptOutcome<'_>) -> RetryVerdict {
        self(outcome)
    }
}

/// Retries transient transport failures, 429 and 5xx other than 501.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryPolicy;

impl DefaultRetryPolicy {
    fn decide_status(status: StatusCode) -> RetryVerdict {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return RetryVerdict::Retry(Some(Error::TooManyRequests));
        }
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            return RetryVerdict::Retry(Some(Error::UnexpectedStatus { status }));
        }
        RetryVerdict::Return
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn decide(&self, outcome: AttemptOutcome<'_>) -> RetryVerdict {
        match outcome {
            Ok(response) => Self::decide_status(response.status()),
            Err(Error::Transport { kind, .. }) if kind.is_terminal() => RetryVerdict::Return,
            Err(Error::Transport { .. }) | Err(Error::ReadBody { .. }) => RetryVerdict::Retry(None),
            Err(Error::HttpStatus { status, .. }) => Self::decide_status(*status),
            Err(_) => RetryVerdict::Return,
        }
    }
}

/// Per-call delay sequence; a new one is started for every logical request.
pub trait Backoff: Send {
    fn next(&mut self, response: Option<&Response<ResponseBody>>) -> Duration;
}

pub trait BackoffStrategy: Send + Sync {
    fn start(&self) -> Box<dyn Backoff>;
}

/// `base * 2^attempt`, counting from the first retry.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, max: None }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_BACKOFF)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn start(&self) -> Box<dyn Backoff> {
        Box::new(ExponentialSequence {
            base: self.base,
            max: self.max,
            attempts: 0,
        })
    }
}

struct ExponentialSequence {
    base: Duration,
    max: Option<Duration>,
    attempts: u32,
}

impl Backoff for ExponentialSequence {
    fn next(&mut self, _response: Option<&Response<ResponseBody>>) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let exponent = self.attempts.min(MAX_BACKOFF_EXPONENT);
        let delay = self.base.saturating_mul(1_u32 << exponent);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Decides how far a delivered response pushes the shared next-try deadline.
pub trait ThrottlePolicy: Send + Sync {
    fn next(&self, response: &Response<ResponseBody>) -> Duration;
}

/// Honors `Retry-After` (seconds or HTTP-date) on 429 responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryAfterThrottle;

impl ThrottlePolicy for RetryAfterThrottle {
    fn next(&self, response: &Response<ResponseBody>) -> Duration {
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Duration::ZERO;
        }
        parse_retry_after(response.headers(), SystemTime::now()).unwrap_or(Duration::ZERO)
    }
}
