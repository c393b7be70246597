use std::io::{self, Write};
use std::sync::Arc;

use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, Request, Uri};

use crate::body::{ReqBody, RequestBody};
use crate::context::Context;
use crate::error::Error;
use crate::util::mask;

/// A fully rendered request, ready to hand to an [`Executor`](crate::Executor).
#[derive(Debug)]
pub struct PreparedRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RequestBody,
    context: Context,
    redacted: Option<Arc<str>>,
}

impl PreparedRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            context: Context::background(),
            redacted: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Dump used for logging instead of the wire form, which may carry secrets.
    pub fn with_redacted_dump(mut self, dump: impl Into<Arc<str>>) -> Self {
        self.redacted = Some(dump.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Copy of this request carrying a fresh body, or `None` once the body cannot be replayed.
    pub fn next_attempt(&mut self) -> Option<Self> {
        let body = self.body.replay()?;
        Some(Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body,
            context: self.context.clone(),
            redacted: self.redacted.clone(),
        })
    }

    /// Text used to log this request; never contains secret values.
    pub fn snapshot(&self) -> Result<String, Error> {
        if let Some(redacted) = &self.redacted {
            return Ok(redacted.to_string());
        }
        let mut dump = Vec::new();
        self.write_wire(&mut dump)
            .map_err(|source| Error::Snapshot { source })?;
        Ok(String::from_utf8_lossy(&dump).into_owned())
    }

    /// Writes the HTTP/1.1 form of the request. Sensitive header values are masked.
    pub fn write_wire<W: Write>(&self, mut out: W) -> io::Result<()> {
        let target = self
            .uri
            .path_and_query()
            .map(|path_and_query| path_and_query.as_str())
            .filter(|target| !target.is_empty())
            .unwrap_or("/");
        write!(out, "{} {} HTTP/1.1\r\n", self.method, target)?;
        match self.uri.authority() {
            Some(authority) if !self.headers.contains_key(HOST) => {
                write!(out, "Host: {authority}\r\n")?
            }
            _ => {}
        }

        for (name, value) in &self.headers {
            let text = String::from_utf8_lossy(value.as_bytes());
            if value.is_sensitive() {
                write!(out, "{}: {}\r\n", title_case(name.as_str()), mask(&text))?;
            } else {
                write!(out, "{}: {}\r\n", title_case(name.as_str()), text)?;
            }
        }

        let body = self.body.as_bytes().filter(|bytes| !bytes.is_empty());
        if let Some(bytes) = body
            && !self.headers.contains_key(CONTENT_LENGTH)
        {
            write!(out, "Content-Length: {}\r\n", bytes.len())?;
        }
        out.write_all(b"\r\n")?;
        if let Some(bytes) = body {
            out.write_all(bytes)?;
        }
        out.flush()
    }

    pub(crate) fn into_http(self) -> (Request<ReqBody>, Context) {
        let mut request = Request::new(self.body.into_http_body());
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        (request, self.context)
    }
}

fn title_case(name: &str) -> String {
    let mut titled = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            titled.push(ch.to_ascii_uppercase());
        } else {
            titled.push(ch);
        }
        upper = ch == '-';
    }
    titled
}

#[cfg(test)]
mod tests {
    use http::header::{AUTHORIZATION, HeaderValue};
    use http::{HeaderMap, Method, Uri};

    use super::PreparedRequest;
    use crate::body::RequestBody;

    #[test]
    fn wire_dump_masks_sensitive_headers() {
        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_static("Bearer abc");
        token.set_sensitive(true);
        headers.insert(AUTHORIZATION, token);
        headers.insert("x-trace", HeaderValue::from_static("t-1"));

        let request = PreparedRequest::new(
            Method::POST,
            Uri::from_static("http://api.local:8080/v1/items?limit=2"),
        )
        .with_headers(headers)
        .with_body(RequestBody::buffered("{}"));

        let dump = request.snapshot().expect("snapshot");
        assert_eq!(
            dump,
            "POST /v1/items?limit=2 HTTP/1.1\r\n\
             Host: api.local:8080\r\n\
             Authorization: **********\r\n\
             X-Trace: t-1\r\n\
             Content-Length: 2\r\n\
             \r\n\
             {}"
        );
    }

    #[test]
    fn redacted_dump_wins_over_wire_form() {
        let request = PreparedRequest::new(Method::GET, Uri::from_static("http://h/"))
            .with_redacted_dump("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(request.snapshot().expect("snapshot"), "GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn next_attempt_fails_after_streaming_body_is_taken() {
        let mut request = PreparedRequest::new(Method::PUT, Uri::from_static("http://h/upload"))
            .with_body(RequestBody::streaming(http_body_util::Empty::<bytes::Bytes>::new()));
        assert!(request.next_attempt().is_some());
        assert!(request.next_attempt().is_none());
    }
}
