use std::convert::Infallible;
use std::fmt;

use bytes::Bytes;
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Body;

use crate::error::{BoxError, Error};

pub(crate) type ReqBody = BoxBody<Bytes, BoxError>;
type RespBody = UnsyncBoxBody<Bytes, BoxError>;
type CloseHook = Box<dyn FnOnce(u64) + Send>;

/// Upper bound on space reserved ahead of data from a declared length.
const MAX_PREALLOCATE: usize = 64 * 1024;

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

enum BodyKind {
    Empty,
    Buffered(Bytes),
    Streaming(Option<ReqBody>),
}

/// Outgoing request payload.
///
/// Buffered bodies can be replayed for every attempt; a streaming body can be
/// sent exactly once.
pub struct RequestBody {
    kind: BodyKind,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    pub fn buffered(body: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Buffered(body.into()),
        }
    }

    pub fn streaming<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            kind: BodyKind::Streaming(Some(body.map_err(|error| -> BoxError { error.into() }).boxed())),
        }
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, BodyKind::Streaming(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Fresh body for the next attempt, or `None` once a streaming body was consumed.
    pub fn replay(&mut self) -> Option<Self> {
        let kind = match &mut self.kind {
            BodyKind::Empty => BodyKind::Empty,
            BodyKind::Buffered(bytes) => BodyKind::Buffered(bytes.clone()),
            BodyKind::Streaming(slot) => BodyKind::Streaming(Some(slot.take()?)),
        };
        Some(Self { kind })
    }

    pub(crate) fn into_http_body(self) -> ReqBody {
        match self.kind {
            BodyKind::Buffered(bytes) => Full::new(bytes)
                .map_err(map_infallible_to_box_error)
                .boxed(),
            BodyKind::Streaming(Some(body)) => body,
            BodyKind::Empty | BodyKind::Streaming(None) => Empty::<Bytes>::new()
                .map_err(map_infallible_to_box_error)
                .boxed(),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Empty => formatter.write_str("RequestBody::Empty"),
            BodyKind::Buffered(bytes) => write!(formatter, "RequestBody::Buffered({} bytes)", bytes.len()),
            BodyKind::Streaming(Some(_)) => formatter.write_str("RequestBody::Streaming"),
            BodyKind::Streaming(None) => formatter.write_str("RequestBody::Streaming(consumed)"),
        }
    }
}

/// Incoming response payload.
///
/// Counts the bytes handed out and reports the total to its close hook when
/// dropped.
pub struct ResponseBody {
    inner: RespBody,
    bytes_read: u64,
    on_close: Option<CloseHook>,
}

impl ResponseBody {
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: body.map_err(|error| -> BoxError { error.into() }).boxed_unsync(),
            bytes_read: 0,
            on_close: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        Self::new(Full::new(body.into()))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub(crate) fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let previous = self.on_close.take();
        self.on_close = Some(Box::new(move |bytes_read| {
            hook(bytes_read);
            if let Some(previous) = previous {
                previous(bytes_read);
            }
        }));
        self
    }

    /// Next data chunk, skipping trailers and empty frames.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        while let Some(frame) = self.inner.frame().await {
            let frame = frame.map_err(|source| Error::ReadBody { source })?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            self.bytes_read = self.bytes_read.saturating_add(data.len() as u64);
            return Ok(Some(data));
        }
        Ok(None)
    }

    /// Appends exactly `len` bytes to `buf`; a shorter stream is an [`Error::UnexpectedEof`].
    pub async fn read_exact(&mut self, buf: &mut Vec<u8>, len: usize) -> Result<(), Error> {
        buf.reserve(len.min(MAX_PREALLOCATE));
        let mut remaining = len;
        while remaining > 0 {
            let Some(data) = self.chunk().await? else {
                return Err(Error::UnexpectedEof {
                    expected: len,
                    actual: len - remaining,
                });
            };
            let take = data.len().min(remaining);
            buf.extend_from_slice(&data[..take]);
            remaining -= take;
        }
        Ok(())
    }

    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        let mut total = 0_usize;
        while let Some(data) = self.chunk().await? {
            total = total.saturating_add(data.len());
            buf.extend_from_slice(&data);
        }
        Ok(total)
    }

    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        let mut collected = Vec::new();
        self.read_to_end(&mut collected).await?;
        Ok(Bytes::from(collected))
    }

    /// Reads and discards at most `limit` bytes, then closes the body.
    pub async fn drain(mut self, limit: usize) -> Result<(), Error> {
        let mut discarded = 0_usize;
        while discarded < limit {
            match self.chunk().await? {
                Some(data) => discarded = discarded.saturating_add(data.len()),
                None => break,
            }
        }
        Ok(())
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook(self.bytes_read);
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ResponseBody")
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{RequestBody, ResponseBody};
    use crate::{Error, ErrorCode};

    #[test]
    fn buffered_body_replays_every_time() {
        let mut body = RequestBody::buffered("payload");
        for _ in 0..3 {
            let replayed = body.replay().expect("buffered bodies replay");
            assert_eq!(replayed.as_bytes().map(|b| b.as_ref()), Some(&b"payload"[..]));
        }
    }

    #[test]
    fn streaming_body_replays_once() {
        let mut body = RequestBody::streaming(http_body_util::Full::new(bytes::Bytes::from("x")));
        assert!(body.replay().is_some());
        assert!(body.replay().is_none());
    }

    #[tokio::test]
    async fn read_exact_reports_short_stream() {
        let mut body = ResponseBody::empty();
        let mut buf = Vec::new();
        let error = body
            .read_exact(&mut buf, 1)
            .await
            .expect_err("empty body cannot satisfy one byte");
        assert_eq!(error.code(), ErrorCode::UnexpectedEof);
    }

    #[tokio::test]
    async fn read_exact_does_not_preallocate_declared_length() {
        let mut body = ResponseBody::from_bytes("{}");
        let mut buf = Vec::new();
        let error = body
            .read_exact(&mut buf, usize::MAX)
            .await
            .expect_err("two bytes cannot satisfy the declared length");
        assert!(matches!(
            error,
            Error::UnexpectedEof { expected: usize::MAX, actual: 2 }
        ));
        assert_eq!(buf, b"{}");
        assert!(buf.capacity() <= super::MAX_PREALLOCATE);
    }

    #[tokio::test]
    async fn close_hook_receives_bytes_read() {
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let hook_seen = Arc::clone(&seen);
        let body = ResponseBody::from_bytes("hello")
            .with_close_hook(move |n| hook_seen.store(n, Ordering::SeqCst));

        let bytes = body.bytes().await.expect("read body");
        assert_eq!(bytes.as_ref(), b"hello");
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn drain_stops_at_limit() {
        let seen = Arc::new(AtomicU64::new(0));
        let hook_seen = Arc::clone(&seen);
        let body = ResponseBody::from_bytes(vec![b'a'; 10_000])
            .with_close_hook(move |n| hook_seen.store(n, Ordering::SeqCst));
        body.drain(16).await.expect("drain");
        // A single full frame is read, so the whole buffer counts.
        assert_eq!(seen.load(Ordering::SeqCst), 10_000);
    }
}
