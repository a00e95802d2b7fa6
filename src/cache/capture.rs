//! Response capture for the cache middleware.

use std::io;

use bytes::{Bytes, BytesMut};

use crate::http::{Headers, ResponseWriter, StatusCode};

/// A [`ResponseWriter`] that records the body while passing it on.
///
/// Every body byte is appended to an internal buffer. Whether it also
/// reaches the wrapped sink depends on the status:
///
/// - with stale fallback enabled and a stale-trigger status committed, both
///   the status and the body are withheld, so the caller can still
///   substitute a cached response or [`release`](Self::release) the buffer;
/// - otherwise the status and body are forwarded immediately.
///
/// Headers always go straight to the wrapped sink.
///
/// A `CaptureWriter` belongs to exactly one request.
///
/// # Examples
///
/// ```
/// use stash::cache::CaptureWriter;
/// use stash::http::{ResponseBuffer, ResponseWriter, StatusCode};
///
/// let mut sink = ResponseBuffer::new();
/// let stale = [StatusCode::InternalServerError];
/// let mut capture = CaptureWriter::new(&mut sink, true, &stale);
///
/// capture.write_status(StatusCode::InternalServerError);
/// capture.write(b"boom").unwrap();
/// assert!(capture.is_withholding());
/// assert_eq!(capture.read_all(), "boom");
///
/// assert!(sink.body().is_empty());
/// assert_eq!(sink.status(), None);
/// ```
pub struct CaptureWriter<'a, W: ResponseWriter + ?Sized> {
    inner: &'a mut W,
    buffer: BytesMut,
    status: Option<StatusCode>,
    use_stale: bool,
    stale_statuses: &'a [StatusCode],
    released: bool,
}

impl<'a, W: ResponseWriter + ?Sized> CaptureWriter<'a, W> {
    pub fn new(inner: &'a mut W, use_stale: bool, stale_statuses: &'a [StatusCode]) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            status: None,
            use_stale,
            stale_statuses,
            released: false,
        }
    }

    /// Returns `true` while output is being kept from the wrapped sink.
    pub fn is_withholding(&self) -> bool {
        !self.released
            && self.use_stale
            && self
                .status
                .is_some_and(|status| self.stale_statuses.contains(&status))
    }

    /// Takes everything buffered so far.
    pub fn read_all(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Stops withholding: forwards the recorded status and the buffered body
    /// to the wrapped sink. Later writes are forwarded as they arrive.
    ///
    /// The buffer itself is left intact for [`read_all`](Self::read_all).
    ///
    /// # Errors
    ///
    /// Propagates write failures from the wrapped sink.
    pub fn release(&mut self) -> io::Result<()> {
        if !self.is_withholding() {
            return Ok(());
        }
        self.released = true;

        if let Some(status) = self.status {
            self.inner.write_status(status);
        }
        if !self.buffer.is_empty() {
            write_all(self.inner, &self.buffer)?;
        }
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for CaptureWriter<'_, W> {
    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_some() {
            return;
        }
        self.status = Some(status);
        if !self.is_withholding() {
            self.inner.write_status(status);
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.write_status(StatusCode::Ok);
        }

        self.buffer.extend_from_slice(buf);
        if !self.is_withholding() {
            write_all(self.inner, buf)?;
        }
        Ok(buf.len())
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

fn write_all<W: ResponseWriter + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let written = writer.write(buf)?;
    if written != buf.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short write to response sink"));
    }
    Ok(())
}
