use http::{Method, StatusCode};
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    TlsUnknownAuthority,
    Read,
    TooManyRedirects,
    UnsupportedScheme,
    MissingHost,
    Other,
}

impl TransportErrorKind {
    /// Kinds describing a request that can never succeed, no matter how often it is sent.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TooManyRedirects
                | Self::UnsupportedScheme
                | Self::MissingHost
                | Self::TlsUnknownAuthority
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::TlsUnknownAuthority => "tls_unknown_authority",
            Self::Read => "read",
            Self::TooManyRedirects => "too_many_redirects",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::MissingHost => "missing_host",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Failure recorded while configuring a [`Request`](crate::Request).
///
/// The first one is kept and reported when the request is rendered or sent.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("can not convert {value} to stringer")]
    NotRenderable { value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Config,
    RawQueryConflict,
    InvalidMethod,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    Render,
    Snapshot,
    Transport,
    TlsInit,
    HttpStatus,
    TooManyRequests,
    UnexpectedStatus,
    Cancelled,
    DeadlineExceeded,
    DeadlineBeforeNextTry,
    BodyNotReplayable,
    ReadBody,
    UnexpectedEof,
    Parse,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::RawQueryConflict => "raw_query_conflict",
            Self::InvalidMethod => "invalid_method",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Render => "render",
            Self::Snapshot => "snapshot",
            Self::Transport => "transport",
            Self::TlsInit => "tls_init",
            Self::HttpStatus => "http_status",
            Self::TooManyRequests => "too_many_requests",
            Self::UnexpectedStatus => "unexpected_status",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::DeadlineBeforeNextTry => "deadline_before_next_try",
            Self::BodyNotReplayable => "body_not_replayable",
            Self::ReadBody => "read_body",
            Self::UnexpectedEof => "unexpected_eof",
            Self::Parse => "parse",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("raw query and query param not allowed")]
    RawQueryConflict,
    #[error("invalid method {method:?}")]
    InvalidMethod { method: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to render request value: {source}")]
    Render {
        #[source]
        source: BoxError,
    },
    #[error("failed to snapshot request: {source}")]
    Snapshot {
        #[source]
        source: std::io::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to initialize tls client config: {source}")]
    TlsInit {
        #[source]
        source: rustls::Error,
    },
    #[error("invalid status {status} for {method} {uri}")]
    HttpStatus {
        status: StatusCode,
        method: Method,
        uri: String,
    },
    #[error("too many requests")]
    TooManyRequests,
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: StatusCode },
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    #[error("deadline is before next try ({wait_ms}ms away)")]
    DeadlineBeforeNextTry { wait_ms: u128 },
    #[error("cannot reset request body for another attempt")]
    BodyNotReplayable,
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("unexpected end of stream: expected {expected} bytes, got {actual}")]
    UnexpectedEof { expected: usize, actual: usize },
    #[error("failed to parse response json: {source}; body={body}")]
    Parse {
        #[source]
        source: BoxError,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::Config,
            Self::RawQueryConflict => ErrorCode::RawQueryConflict,
            Self::InvalidMethod { .. } => ErrorCode::InvalidMethod,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Render { .. } => ErrorCode::Render,
            Self::Snapshot { .. } => ErrorCode::Snapshot,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::TlsInit { .. } => ErrorCode::TlsInit,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::TooManyRequests => ErrorCode::TooManyRequests,
            Self::UnexpectedStatus { .. } => ErrorCode::UnexpectedStatus,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::DeadlineBeforeNextTry { .. } => ErrorCode::DeadlineBeforeNextTry,
            Self::BodyNotReplayable => ErrorCode::BodyNotReplayable,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::UnexpectedEof { .. } => ErrorCode::UnexpectedEof,
            Self::Parse { .. } => ErrorCode::Parse,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } | Self::UnexpectedStatus { status } => Some(*status),
            Self::TooManyRequests => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }
}
