// Request upload tracking.
//
// The request body is handed to hyper in fixed-size frames, and the
// connection's stream is wrapped so every accepted write and completed
// flush is observed. Once the last frame has been taken and a flush
// completes afterwards, hyper's write buffer is empty and the request is
// on the wire. The response deadline starts from that point.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;

/// Size of one request body frame.
const FRAME_LEN: usize = 64 * 1024;

/// Upload state of the single request on a connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Progress {
    /// Bytes accepted by the stream, request head included.
    pub written: u64,
    body_taken: bool,
    /// Every request byte has been flushed to the stream.
    pub sent: bool,
}

/// Shared between the request body, the wrapped stream and the session.
#[derive(Debug, Clone)]
pub(crate) struct UploadTracker(Arc<watch::Sender<Progress>>);

impl UploadTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Progress::default());
        Self(Arc::new(tx))
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Progress> {
        self.0.subscribe()
    }

    fn wrote(&self, n: usize) {
        if n > 0 {
            let n = u64::try_from(n).unwrap_or(u64::MAX);
            self.0.send_modify(|p| p.written = p.written.saturating_add(n));
        }
    }

    fn body_taken(&self) {
        // no wakeup: nothing is on the wire yet
        self.0.send_if_modified(|p| {
            p.body_taken = true;
            false
        });
    }

    fn flushed(&self) {
        self.0.send_if_modified(|p| {
            if p.body_taken && !p.sent {
                p.sent = true;
                true
            } else {
                false
            }
        });
    }
}

// ── Request body ─────────────────────────────────────────────────────

/// In-memory request body served in `FRAME_LEN` frames.
pub(crate) struct RequestBody {
    remaining: Bytes,
    tracker: UploadTracker,
}

impl RequestBody {
    pub(crate) fn new(content: impl Into<Bytes>, tracker: UploadTracker) -> Self {
        let remaining = content.into();
        if remaining.is_empty() {
            tracker.body_taken();
        }
        Self { remaining, tracker }
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.remaining.is_empty() {
            this.tracker.body_taken();
            return Poll::Ready(None);
        }
        let frame = this.remaining.split_to(FRAME_LEN.min(this.remaining.len()));
        if this.remaining.is_empty() {
            this.tracker.body_taken();
        }
        Poll::Ready(Some(Ok(Frame::data(frame))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(u64::try_from(self.remaining.len()).unwrap_or(u64::MAX))
    }
}

// ── Stream wrapper ───────────────────────────────────────────────────

/// Connection stream that reports writes and flushes to a tracker.
pub(crate) struct Tracked<S> {
    inner: S,
    tracker: UploadTracker,
}

impl<S> Tracked<S> {
    pub(crate) fn new(inner: S, tracker: UploadTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Tracked<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Tracked<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = polled {
            this.tracker.wrote(n);
        }
        polled
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = polled {
            this.tracker.wrote(n);
        }
        polled
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = polled {
            this.tracker.flushed();
        }
        polled
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
