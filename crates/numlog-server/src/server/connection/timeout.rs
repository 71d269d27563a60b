use core::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use pin_project_lite::pin_project;
use std::io;
use tokio::{
    io::{AsyncRead, ReadBuf},
    time::{Instant, Sleep, sleep},
};

pin_project! {
    /// Fails reads with [`io::ErrorKind::TimedOut`] once the wrapped reader
    /// has been silent for `timeout`.
    ///
    /// The deadline restarts on every completed read, so a client trickling a
    /// line byte by byte stays connected as long as no single gap exceeds the
    /// timeout.
    #[must_use = "readers do nothing unless polled"]
    pub struct IdleTimeout<R> {
        #[pin]
        inner: R,
        #[pin]
        deadline: Sleep,
        timeout: Duration,
    }
}

impl<R> IdleTimeout<R> {
    /// Wraps `inner`; the first deadline is `timeout` from now. Must be called
    /// within a tokio runtime.
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            deadline: sleep(timeout),
            timeout,
        }
    }
}

impl<R: AsyncRead> AsyncRead for IdleTimeout<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.deadline.as_mut().reset(Instant::now() + *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => {
                ready!(this.deadline.poll(cx));
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received for {:?}", this.timeout),
                )))
            }
        }
    }
}
