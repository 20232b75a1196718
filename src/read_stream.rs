//! Read Stream Module
//!
//! Byte streams handed out by data providers. Every stream is an `AsyncRead` that
//! can also be closed explicitly; closing is how a caller signals that it is done
//! delivering bytes, which for local reads is also when the record's lock is
//! released.

use crate::record::RecordGuard;
use crate::Result;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

/// A readable, closable object stream
pub trait ObjectReader: AsyncRead + Send + Unpin {
    /// Release whatever the stream holds. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Boxed stream as returned to callers
pub type BoxObjectReader = Box<dyn ObjectReader>;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Stream over local bytes that keeps the record's lock held until closed.
///
/// The release action runs exactly once: on the first `close`, or on drop if the
/// stream is never closed. Later `close` calls are no-ops. Closing drops the inner
/// stream before releasing.
pub struct DeferredReleaseReader<R> {
    inner: Option<R>,
    release: Option<ReleaseFn>,
}

impl<R> DeferredReleaseReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Take ownership of the caller's hold on the record
    pub fn new(inner: R, guard: RecordGuard) -> Self {
        Self::with_release(inner, move || guard.unlock())
    }

    pub fn with_release<F>(inner: R, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Some(inner),
            release: Some(Box::new(release)),
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn release(&mut self) {
        self.inner = None;
        if let Some(release) = self.release.take() {
            release();
            debug!("deferred lock released");
        }
    }
}

impl<R> AsyncRead for DeferredReleaseReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "read after close",
            ))),
        }
    }
}

impl<R> ObjectReader for DeferredReleaseReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl<R> Drop for DeferredReleaseReader<R> {
    fn drop(&mut self) {
        self.inner = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<R> fmt::Debug for DeferredReleaseReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredReleaseReader")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Stream with nothing to release (remote fetches)
pub struct NopCloser<R> {
    inner: R,
}

impl<R> NopCloser<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R> AsyncRead for NopCloser<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> ObjectReader for NopCloser<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn counting_reader(data: &'static [u8]) -> (DeferredReleaseReader<Cursor<&'static [u8]>>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let reader = DeferredReleaseReader::with_release(Cursor::new(data), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (reader, releases)
    }

    #[tokio::test]
    async fn test_close_releases_exactly_once() {
        let (mut reader, releases) = counting_reader(b"payload");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        reader.close().unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        drop(reader);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    struct LoggedReader {
        inner: Cursor<&'static [u8]>,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl AsyncRead for LoggedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl Drop for LoggedReader {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("file closed");
        }
    }

    #[tokio::test]
    async fn test_close_drops_file_before_release() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let inner = LoggedReader {
            inner: Cursor::new(&b"abc"[..]),
            log: Arc::clone(&log),
        };
        let release_log = Arc::clone(&log);
        let mut reader = DeferredReleaseReader::with_release(inner, move || {
            release_log.lock().unwrap().push("released");
        });
        assert!(reader.is_open());

        reader.close().unwrap();
        assert!(!reader.is_open());
        assert_eq!(*log.lock().unwrap(), vec!["file closed", "released"]);

        drop(reader);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_without_close_releases() {
        let (reader, releases) = counting_reader(b"x");
        drop(reader);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_after_close_fails() {
        let (mut reader, _) = counting_reader(b"abc");
        reader.close().unwrap();
        assert!(reader.is_released());
        let mut buf = [0u8; 3];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_nop_closer_passthrough() {
        let mut reader: BoxObjectReader = Box::new(NopCloser::new(Cursor::new(b"remote".to_vec())));
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(out, "remote");
    }
}
