use std::{
    future::Future,
    io::Write,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::AsyncWrite,
    runtime::{Builder, Runtime},
};

/// Runtime that blocking callers park on while an async operation settles.
pub fn blocking_runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

pub fn block_until_ready<Fut, T>(runtime: &Runtime, future: Fut) -> T
where
    Fut: Future<Output = T>,
{
    runtime.block_on(future)
}

/// Like `block_until_ready`, but gives up after `timeout`. `None` means the
/// future was still pending; it is dropped at that point.
pub fn block_until_ready_timeout<Fut, T>(runtime: &Runtime, future: Fut, timeout: Duration) -> Option<T>
where
    Fut: Future<Output = T>,
{
    runtime.block_on(async { tokio::time::timeout(timeout, future).await.ok() })
}

/// Presents a blocking writer to async code. Writes complete immediately,
/// which is fine on the thread that is parked in `block_until_ready` anyway.
pub struct BlockingWriter<W>(pub W);

impl<W: Write + Unpin> AsyncWrite for BlockingWriter<W> {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Poll::Ready(self.get_mut().0.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(self.get_mut().0.flush())
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.poll_flush(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_until_ready() {
        let runtime = blocking_runtime().unwrap();
        let value = block_until_ready(&runtime, async {
            tokio::task::yield_now().await;
            7
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_block_until_ready_timeout() {
        let runtime = blocking_runtime().unwrap();

        let done = block_until_ready_timeout(&runtime, async { 1 }, Duration::from_secs(1));
        assert_eq!(done, Some(1));

        let pending = block_until_ready_timeout(
            &runtime,
            futures::future::pending::<()>(),
            Duration::from_millis(10),
        );
        assert_eq!(pending, None);
    }

    #[test]
    fn test_blocking_writer() {
        use tokio::io::AsyncWriteExt;

        let runtime = blocking_runtime().unwrap();
        let mut out: Vec<u8> = Vec::new();
        block_until_ready(&runtime, async {
            let mut writer = BlockingWriter(&mut out);
            writer.write_all(b"abc").await.unwrap();
            writer.flush().await.unwrap();
        });

        assert_eq!(out, b"abc");
    }
}
