//! Byte-count progress reporting.
//!
//! A [`ProgressTracker`] accumulates processed bytes against a known total
//! and forwards every change to an observer. [`ProgressWriter`] sits in front
//! of an async sink and feeds the tracker with the bytes the sink accepted.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Observer invoked with `(bytes_written, total_size)`.
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

/// Job-local progress state.
///
/// Reported values never decrease and never exceed the total, so observers
/// can map them straight onto a percentage.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    total_size: u64,
    written: u64,
    reported: u64,
}

impl ProgressTracker {
    pub fn new(callback: impl FnMut(u64, u64) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            total_size: 0,
            written: 0,
            reported: 0,
        }
    }

    /// A tracker without an observer.
    pub fn silent() -> Self {
        Self {
            callback: None,
            total_size: 0,
            written: 0,
            reported: 0,
        }
    }

    /// Record the job size and emit the 0% baseline.
    pub fn set_total_size(&mut self, size: u64) {
        self.total_size = size;
        self.written = 0;
        self.reported = 0;
        self.notify(0);
    }

    pub fn add_progress(&mut self, bytes: u64) {
        self.written = self.written.saturating_add(bytes);
        let current = self.written.min(self.total_size).max(self.reported);
        self.notify(current);
    }

    /// Force the counter to the total and emit the final notification.
    pub fn set_complete(&mut self) {
        self.written = self.total_size;
        self.notify(self.total_size);
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Raw bytes seen so far, which may exceed the total on expanding output.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn notify(&mut self, current: u64) {
        self.reported = current;
        if let Some(callback) = self.callback.as_mut() {
            callback(current, self.total_size);
        }
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total_size", &self.total_size)
            .field("written", &self.written)
            .field("has_observer", &self.callback.is_some())
            .finish()
    }
}

/// Pass-through writer that mirrors accepted bytes into a tracker.
pub struct ProgressWriter<'a, W> {
    inner: W,
    tracker: &'a mut ProgressTracker,
}

impl<'a, W> ProgressWriter<'a, W> {
    pub fn new(inner: W, tracker: &'a mut ProgressTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<'_, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            if *n > 0 {
                this.tracker.add_progress(*n as u64);
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
