//! Response sinks.
//!
//! A [`ResponseWriter`] receives a response piece by piece: headers are
//! mutated in place, the status line is committed once, and body bytes are
//! written in chunks. [`ResponseBuffer`] is the terminal sink that collects
//! everything into a [`Response`]; other writers wrap a sink to observe or
//! redirect what flows through it.

use std::io;

use bytes::BytesMut;

use super::{Headers, Response, StatusCode};

/// A destination for a response that is produced incrementally.
///
/// # Contract
///
/// - The first call to [`write_status`](Self::write_status) wins; later
///   calls are ignored.
/// - Calling [`write`](Self::write) before any status was written commits
///   an implicit `200 OK`.
/// - Header mutations made after the status was committed are still
///   recorded. Sinks that serialize on the fly are free to ignore them.
pub trait ResponseWriter: Send {
    /// Returns the headers accumulated so far.
    fn headers(&self) -> &Headers;

    /// Returns the headers for in-place mutation.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Commits the response status.
    fn write_status(&mut self, status: StatusCode);

    /// Appends body bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Returns the committed status, if any.
    fn status(&self) -> Option<StatusCode>;
}

/// An in-memory [`ResponseWriter`] that assembles a [`Response`].
///
/// # Examples
///
/// ```
/// use stash::http::{ResponseBuffer, ResponseWriter, StatusCode};
///
/// let mut sink = ResponseBuffer::new();
/// sink.headers_mut().insert("Content-Type", "text/plain");
/// sink.write(b"hello").unwrap();
/// sink.write_status(StatusCode::NotFound); // too late, 200 was implied
///
/// let response = sink.into_response();
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.payload(), b"hello");
/// ```
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
}

impl ResponseBuffer {
    /// Creates an empty sink with no committed status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finishes the sink, defaulting the status to `200 OK` if none was written.
    pub fn into_response(self) -> Response {
        Response::from_parts(
            self.status.unwrap_or(StatusCode::Ok),
            self.headers,
            self.body.to_vec(),
        )
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::Ok);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }
}
