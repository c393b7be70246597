use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use http::Response;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::body::{ReqBody, ResponseBody};
use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{Error, TransportErrorKind};
use crate::executor::Executor;
use crate::prepared::PreparedRequest;
use crate::util::{classify_transport_error, redact_uri_for_logs};

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

type HttpsClient = Client<HttpsConnector<HttpConnector>, ReqBody>;

/// HTTP/1.1 executor over hyper-util's pooled client, with rustls for `https` targets.
///
/// Schemes other than `http` and `https` fail with a terminal
/// [`TransportErrorKind::UnsupportedScheme`].
///
/// The connection pool belongs to the tokio runtime the executor is first used on;
/// create one executor per runtime.
#[derive(Clone, Debug)]
pub struct HyperExecutor {
    client: HttpsClient,
}

impl HyperExecutor {
    pub fn new() -> Result<Self, Error> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, Error> {
        let tls_config = default_tls_config().map_err(|source| Error::TlsInit { source })?;
        Ok(Self::with_tls_config(tls_config.as_ref().clone(), connect_timeout))
    }

    /// Uses a caller-supplied rustls configuration, e.g. with private roots.
    pub fn with_tls_config(tls_config: rustls::ClientConfig, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .build(https);
        Self { client }
    }
}

/// Process-wide rustls configuration: ring provider and the webpki root store.
pub(crate) fn default_tls_config() -> Result<Arc<rustls::ClientConfig>, rustls::Error> {
    static CONFIG: OnceLock<Result<Arc<rustls::ClientConfig>, rustls::Error>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let roots =
                rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map(|builder| {
                Arc::new(
                    builder
                        .with_root_certificates(roots)
                        .with_no_client_auth(),
                )
            })
        })
        .clone()
}

fn precondition_error(
    kind: TransportErrorKind,
    request: &PreparedRequest,
    uri: &str,
    reason: &'static str,
) -> Error {
    Error::Transport {
        kind,
        method: request.method().clone(),
        uri: uri.to_owned(),
        source: reason.into(),
    }
}

#[async_trait]
impl Executor for HyperExecutor {
    async fn execute(&self, request: PreparedRequest) -> Result<Response<ResponseBody>, Error> {
        let uri = redact_uri_for_logs(&request.uri().to_string());
        match request.uri().scheme_str() {
            Some("http" | "https") => {}
            Some(_) => {
                return Err(precondition_error(
                    TransportErrorKind::UnsupportedScheme,
                    &request,
                    &uri,
                    "unsupported protocol scheme",
                ));
            }
            None => {
                return Err(precondition_error(
                    TransportErrorKind::UnsupportedScheme,
                    &request,
                    &uri,
                    "missing protocol scheme",
                ));
            }
        }
        if request.uri().host().is_none_or(str::is_empty) {
            return Err(precondition_error(
                TransportErrorKind::MissingHost,
                &request,
                &uri,
                "no host in request URL",
            ));
        }

        let method = request.method().clone();
        let (http_request, context) = request.into_http();
        let response = context
            .run(self.client.request(http_request))
            .await?
            .map_err(|source| Error::Transport {
                kind: classify_transport_error(&source),
                method,
                uri,
                source: Box::new(source),
            })?;
        Ok(response.map(ResponseBody::new))
    }
}
