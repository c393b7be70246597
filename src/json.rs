use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::body::ResponseBody;
use crate::error::Error;
use crate::util::{content_length, truncate_body};

/// Turns a response body into a JSON document.
pub trait JsonParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Value, Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SerdeJsonParser;

impl JsonParser for SerdeJsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<Value, Error> {
        serde_json::from_slice(bytes).map_err(|source| Error::Parse {
            source: Box::new(source),
            body: truncate_body(bytes),
        })
    }
}

/// Buffered JSON response with path lookups.
///
/// The byte buffer survives [`Request::send_json_into`](crate::Request::send_json_into)
/// calls so a long-lived value avoids reallocating per response.
pub struct JsonResponse {
    status: StatusCode,
    headers: HeaderMap,
    document: Value,
    buf: Vec<u8>,
    parser: Arc<dyn JsonParser>,
}

impl JsonResponse {
    pub fn new() -> Self {
        Self::with_parser(SerdeJsonParser)
    }

    pub fn with_parser(parser: impl JsonParser + 'static) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            document: Value::Null,
            buf: Vec::new(),
            parser: Arc::new(parser),
        }
    }

    pub fn set_parser(&mut self, parser: impl JsonParser + 'static) {
        self.parser = Arc::new(parser);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Whole document; `Null` until a body has been parsed successfully.
    pub fn body(&self) -> &Value {
        &self.document
    }

    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    /// Walks `path` from the document root. Numeric keys index into arrays.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.document, |node, key| match node {
            Value::Object(map) => map.get(*key),
            Value::Array(items) => items.get(key.parse::<usize>().ok()?),
            _ => None,
        })
    }

    pub fn string(&self, path: &[&str]) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn int(&self, path: &[&str]) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    pub fn array(&self, path: &[&str]) -> Option<&[Value]> {
        self.get(path)?.as_array().map(Vec::as_slice)
    }

    pub fn decode<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.buf).map_err(|source| Error::Parse {
            source: Box::new(source),
            body: truncate_body(&self.buf),
        })
    }

    pub(crate) fn clear(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.document = Value::Null;
        self.buf.clear();
    }

    /// Buffers and parses `response`.
    ///
    /// A declared length is read exactly (a shorter body is an error); without
    /// one the body is read to its end. An empty body leaves the document `Null`.
    pub(crate) async fn fill(&mut self, response: Response<ResponseBody>) -> Result<(), Error> {
        let (parts, mut body) = response.into_parts();
        self.status = parts.status;
        self.headers = parts.headers;
        self.document = Value::Null;
        self.buf.clear();

        match content_length(&self.headers) {
            Some(0) => {}
            Some(len) => body.read_exact(&mut self.buf, len).await?,
            None => {
                body.read_to_end(&mut self.buf).await?;
            }
        }
        drop(body);

        if self.buf.is_empty() {
            return Ok(());
        }
        self.document = self.parser.parse(&self.buf)?;
        Ok(())
    }
}

impl Default for JsonResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JsonResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JsonResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
