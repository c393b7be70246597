use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::{ACCEPT, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Response, Uri};
use serde::Serialize;

use crate::body::{RequestBody, ResponseBody};
use crate::context::Context;
use crate::error::{ConfigError, Error};
use crate::executor::{Executor, default_executor};
use crate::json::JsonResponse;
use crate::lazy::{IntoLazy, Lazy};
use crate::prepared::PreparedRequest;
use crate::util::{
    attach_query, contains_placeholder, encode_query_pairs, join_base_path, mask,
    redact_uri_for_logs, substitute_secrets,
};

const APPLICATION_JSON: &str = "application/json";

/// Placeholder text standing for the secret registered under `name`.
pub fn secret_key(name: &str) -> String {
    format!("${{{name}}}")
}

/// Deferred request description.
///
/// Every value is kept as a [`Lazy`] and rendered only when the request is
/// built or sent, so bound values observe later mutation. A value that cannot
/// be converted is remembered as the first configuration error and reported by
/// [`render`](Self::render), [`write_to`](Self::write_to) and the `send` family.
///
/// Secrets are stored under a `${name}` placeholder; any header, query or body
/// text containing the placeholder receives the real value on the wire and an
/// equal-length mask in diagnostic output. Literal text that happens to contain a
/// registered placeholder is substituted as well.
#[derive(Clone)]
pub struct Request {
    method: Option<Lazy>,
    base_url: Lazy,
    path: Lazy,
    body: Option<Lazy>,
    headers: BTreeMap<String, Lazy>,
    query: BTreeMap<String, Lazy>,
    secrets: BTreeMap<String, Lazy>,
    timeout: Option<Duration>,
    error: Option<ConfigError>,
    executor: Arc<dyn Executor>,
}

impl Request {
    pub fn new(url: impl IntoLazy) -> Self {
        Self {
            method: None,
            base_url: Lazy::empty(),
            path: Lazy::empty(),
            body: None,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            secrets: BTreeMap::new(),
            timeout: None,
            error: None,
            executor: default_executor(),
        }
        .url(url)
    }

    pub fn get(url: impl IntoLazy) -> Self {
        Self::new(url).method(Method::GET.as_str())
    }

    pub fn post(url: impl IntoLazy) -> Self {
        Self::new(url).method(Method::POST.as_str())
    }

    fn coerce(&mut self, value: impl IntoLazy) -> Lazy {
        match value.into_lazy() {
            Ok(lazy) => lazy,
            Err(error) => {
                self.error.get_or_insert(error);
                Lazy::empty()
            }
        }
    }

    fn coerce_secret(&mut self, value: impl IntoLazy) -> Lazy {
        let lazy = self.coerce(value);
        let name = format!("MASKED_{}", self.secrets.len() + 1);
        let placeholder = secret_key(&name);
        self.secrets.insert(placeholder.clone(), lazy);
        Lazy::text(placeholder)
    }

    pub fn method(mut self, method: impl IntoLazy) -> Self {
        self.method = Some(self.coerce(method));
        self
    }

    pub fn url(mut self, url: impl IntoLazy) -> Self {
        self.base_url = self.coerce(url);
        self
    }

    pub fn path(mut self, path: impl IntoLazy) -> Self {
        self.path = self.coerce(path);
        self
    }

    pub fn body(mut self, content_type: &str, body: impl IntoLazy) -> Self {
        self.body = Some(self.coerce(body));
        self.content_type(content_type)
    }

    /// Serializes `value` as the body every time the request is rendered.
    pub fn json_body<T>(self, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body(
            APPLICATION_JSON,
            Lazy::try_from_fn(move || serde_json::to_string(&value)),
        )
    }

    pub fn header(mut self, name: &str, value: impl IntoLazy) -> Self {
        let value = self.coerce(value);
        self.headers.insert(name.to_ascii_lowercase(), value);
        self
    }

    /// Sets a header whose value is masked in every diagnostic rendering.
    pub fn secret_header(mut self, name: &str, value: impl IntoLazy) -> Self {
        let placeholder = self.coerce_secret(value);
        self.headers.insert(name.to_ascii_lowercase(), placeholder);
        self
    }

    /// Registers `value` under the placeholder [`secret_key(name)`](secret_key).
    pub fn secret(mut self, name: &str, value: impl IntoLazy) -> Self {
        let value = self.coerce(value);
        self.secrets.insert(secret_key(name), value);
        self
    }

    pub fn query(mut self, name: &str, value: impl IntoLazy) -> Self {
        let value = self.coerce(value);
        self.query.insert(name.to_owned(), value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn content_type(self, content_type: &str) -> Self {
        self.header(http::header::CONTENT_TYPE.as_str(), content_type)
    }

    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let credentials = STANDARD.encode(format!("{user}:{password}"));
        self.secret_header(
            http::header::AUTHORIZATION.as_str(),
            format!("Basic {credentials}"),
        )
    }

    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Clears method, url, path, body, headers, query and the recorded error.
    /// Secrets, timeout and executor are kept.
    pub fn reset(&mut self) {
        self.method = None;
        self.base_url = Lazy::empty();
        self.path = Lazy::empty();
        self.body = None;
        self.error = None;
        self.headers.clear();
        self.query.clear();
    }

    pub fn config_error(&self) -> Option<&ConfigError> {
        self.error.as_ref()
    }

    /// Renders the request as it goes on the wire.
    pub fn render(&self) -> Result<PreparedRequest, Error> {
        self.render_with(false, false)
    }

    /// Renders the request with every secret replaced by an equal-length mask.
    pub fn render_masked(&self) -> Result<PreparedRequest, Error> {
        self.render_with(true, false)
    }

    /// Writes the masked HTTP/1.1 form of the request.
    pub fn write_to<W: Write>(&self, out: W) -> Result<(), Error> {
        self.render_masked()?
            .write_wire(out)
            .map_err(|source| Error::Snapshot { source })
    }

    pub async fn send(&self, context: &Context) -> Result<Response<ResponseBody>, Error> {
        let context = self.call_context(context);
        self.dispatch(&context, false).await
    }

    /// Sends the request and parses a JSON response.
    pub async fn send_json(&self, context: &Context) -> Result<JsonResponse, Error> {
        let mut response = JsonResponse::new();
        self.send_json_into(context, &mut response).await?;
        Ok(response)
    }

    /// Like [`send_json`](Self::send_json) but refills `target`, reusing its buffer.
    pub async fn send_json_into(
        &self,
        context: &Context,
        target: &mut JsonResponse,
    ) -> Result<(), Error> {
        target.clear();
        let context = self.call_context(context);
        let response = self.dispatch(&context, true).await?;
        context.run(target.fill(response)).await?
    }

    fn call_context(&self, context: &Context) -> Context {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => context.with_timeout(timeout),
            _ => context.clone(),
        }
    }

    async fn dispatch(
        &self,
        context: &Context,
        accept_json: bool,
    ) -> Result<Response<ResponseBody>, Error> {
        let masked = self.render_with(true, accept_json)?;
        let mut dump = Vec::new();
        masked
            .write_wire(&mut dump)
            .map_err(|source| Error::Snapshot { source })?;

        let prepared = self
            .render_with(false, accept_json)?
            .with_context(context.clone())
            .with_redacted_dump(String::from_utf8_lossy(&dump));
        context.run(self.executor.execute(prepared)).await?
    }

    fn render_secrets(&self, masked: bool) -> Result<Vec<(String, String)>, Error> {
        self.secrets
            .iter()
            .map(|(placeholder, value)| -> Result<(String, String), Error> {
                let value = value.render()?;
                let value = if masked { mask(&value) } else { value };
                Ok((placeholder.clone(), value))
            })
            .collect()
    }

    fn render_with(&self, masked: bool, accept_json: bool) -> Result<PreparedRequest, Error> {
        if let Some(error) = &self.error {
            return Err(error.clone().into());
        }

        let method_text = match &self.method {
            Some(method) => method.render()?,
            None => Method::GET.as_str().to_owned(),
        };
        let method = Method::from_bytes(method_text.as_bytes())
            .map_err(|_| Error::InvalidMethod {
                method: method_text.clone(),
            })?;

        let secrets = self.render_secrets(masked)?;
        let mut url = join_base_path(&self.base_url.render()?, &self.path.render()?);
        if !self.query.is_empty() {
            let pairs = self
                .query
                .iter()
                .map(|(name, value)| -> Result<(String, String), Error> {
                    Ok((name.clone(), substitute_secrets(&value.render()?, &secrets)))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let encoded = encode_query_pairs(
                pairs
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
            url = attach_query(&url, &encoded).ok_or(Error::RawQueryConflict)?;
        }
        let uri = url.parse::<Uri>().map_err(|_| Error::InvalidUri {
            uri: redact_uri_for_logs(&url),
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            let raw = value.render()?;
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|source| Error::InvalidHeaderName {
                    name: name.clone(),
                    source,
                })?;
            let mut header_value = HeaderValue::from_str(&substitute_secrets(&raw, &secrets))
                .map_err(|source| Error::InvalidHeaderValue {
                    name: name.clone(),
                    source,
                })?;
            if !masked && contains_placeholder(&raw, &secrets) {
                header_value.set_sensitive(true);
            }
            headers.insert(header_name, header_value);
        }
        if accept_json && !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        }

        let body = match &self.body {
            Some(body) => RequestBody::buffered(substitute_secrets(&body.render()?, &secrets)),
            None => RequestBody::empty(),
        };

        Ok(PreparedRequest::new(method, uri)
            .with_headers(headers)
            .with_body(body))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("query", &self.query.keys().collect::<Vec<_>>())
            .field("secrets", &self.secrets.len())
            .field("timeout", &self.timeout)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
