use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use http::Response;

use crate::body::ResponseBody;
use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_DRAIN_LIMIT};
use crate::error::Error;
use crate::prepared::PreparedRequest;
use crate::transport::{HyperExecutor, default_tls_config};
use crate::util::redact_uri_for_logs;

/// Sends one prepared request. An `Err` means there is no usable response.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error>;
}

#[async_trait]
impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        (**self).execute(request).await
    }
}

#[async_trait]
impl<E> Executor for Box<E>
where
    E: Executor + ?Sized,
{
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        (**self).execute(request).await
    }
}

/// Executor backed by an async closure.
pub struct FnExecutor<F> {
    call: F,
}

impl<F> fmt::Debug for FnExecutor<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(PreparedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, Error>> + Send,
{
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        (self.call)(request).await
    }
}

pub fn executor_fn<F, Fut>(call: F) -> FnExecutor<F>
where
    F: Fn(PreparedRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, Error>> + Send,
{
    FnExecutor { call }
}

/// Turns non-2xx responses into [`Error::HttpStatus`] after draining a bounded prefix of the body.
#[derive(Debug)]
pub struct RequireSuccess<E> {
    inner: E,
    drain_limit: usize,
}

impl<E> RequireSuccess<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            drain_limit: DEFAULT_DRAIN_LIMIT,
        }
    }

    pub fn with_drain_limit(mut self, drain_limit: usize) -> Self {
        self.drain_limit = drain_limit;
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E> Executor for RequireSuccess<E>
where
    E: Executor,
{
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        let method = request.method().clone();
        let uri = redact_uri_for_logs(&request.uri().to_string());
        let response = self.inner.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Drain failures are irrelevant here; the status is what gets reported.
        let _ = response.into_body().drain(self.drain_limit).await;
        Err(Error::HttpStatus {
            status,
            method,
            uri,
        })
    }
}

/// The executor requests use unless one is configured: HTTP(S) with non-2xx treated as errors.
///
/// Each call gets its own connection pool; only the TLS configuration is shared
/// process-wide, so a pool never outlives the runtime that opened its connections.
pub fn default_executor() -> Arc<dyn Executor> {
    match default_tls_config() {
        Ok(tls_config) => Arc::new(RequireSuccess::new(HyperExecutor::with_tls_config(
            tls_config.as_ref().clone(),
            DEFAULT_CONNECT_TIMEOUT,
        ))),
        Err(source) => Arc::new(executor_fn(move |_request| {
            let source = source.clone();
            async move { Err::<Response<ResponseBody>, _>(Error::TlsInit { source }) }
        })),
    }
}
