pub mod cgi;
pub mod responder;

use std::io;

use http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};

pub type HttpResponse = http::Response<Vec<u8>>;

/// In-memory response sink.
///
/// Everything a template or the error reporter produces lands here first. Nothing
/// reaches the client until the finished capture is committed, so a render that
/// fails halfway never leaks partial output.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture {
    headers: HeaderMap,
    status: StatusCode,
    body: Vec<u8>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header names are case-insensitive; `insert` replaces any earlier value.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: &'static str) {
        self.headers.insert(name, HeaderValue::from_static(value));
    }

    pub fn set_default_header(&mut self, name: HeaderName, value: &'static str) {
        self.headers
            .entry(name)
            .or_insert_with(|| HeaderValue::from_static(value));
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.body.extend_from_slice(bytes);
        bytes.len()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Commits the capture as a regular response: headers, then status, then body.
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = HttpResponse::default();
        *response.headers_mut() = self.headers;
        *response.status_mut() = self.status;
        *response.body_mut() = self.body;
        response
    }
}

impl io::Write for ResponseCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
