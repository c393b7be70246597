//! `lazyreq` builds HTTP requests from deferred, redaction-aware values and runs
//! them through a retrying executor that honors a shared rate-limit deadline.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use lazyreq::prelude::{Binding, Context, HyperExecutor, Request, Retryer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let token = Binding::new("initial");
//!     let request = Request::get("http://api.example.com")
//!         .path("/v1/items")
//!         .secret_header("authorization", &token)
//!         .query("limit", "10")
//!         .timeout(Duration::from_secs(8))
//!         .executor(Retryer::new(HyperExecutor::new()?));
//!
//!     token.set("refreshed");
//!     let items = request.send_json(&Context::background()).await?;
//!     println!("first id={:?}", items.string(&["items", "0", "id"]));
//!     Ok(())
//! }
//! ```
//!
//! Request dumps handed to loggers come from the masked rendering: every
//! secret is replaced by `*` of the same length.

mod body;
mod config;
mod context;
mod error;
mod executor;
mod json;
mod lazy;
mod observe;
mod prepared;
mod request;
mod retry;
mod retryer;
mod transport;
mod util;

pub use crate::body::{RequestBody, ResponseBody};
pub use crate::config::RetryConfig;
pub use crate::context::Context;
pub use crate::error::{ConfigError, Error, ErrorCode, TransportErrorKind};
pub use crate::executor::{Executor, FnExecutor, RequireSuccess, default_executor, executor_fn};
pub use crate::json::{JsonParser, JsonResponse, SerdeJsonParser};
pub use crate::lazy::{Binding, IntoLazy, Lazy};
pub use crate::observe::{FnLogger, RequestIds, RequestLogger, TracingLogger, logger_fn};
pub use crate::prepared::PreparedRequest;
pub use crate::request::{Request, secret_key};
pub use crate::retry::{
    AttemptOutcome, Backoff, BackoffStrategy, DefaultRetryPolicy, ExponentialBackoff,
    RetryAfterThrottle, RetryPolicy, RetryVerdict, ThrottlePolicy,
};
pub use crate::retryer::{Retryer, RetryerBuilder, SharedDeadline};
pub use crate::transport::HyperExecutor;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Binding, Context, DefaultRetryPolicy, Error, ErrorCode, Executor, ExponentialBackoff,
        HyperExecutor, JsonResponse, Lazy, PreparedRequest, Request, RequireSuccess,
        ResponseBody, RetryConfig, RetryPolicy, RetryVerdict, Retryer, TransportErrorKind,
    };
}
