use crate::error::MediaStoreError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Handle to one storage operation running on the blocking worker pool
///
/// Await it for the single outcome. Dropping the handle (or calling
/// [`TaskHandle::cancel`]) aborts the task: an operation that already started
/// runs to completion on its worker, but its result is discarded instead of
/// being delivered to a screen that is gone.
pub struct TaskHandle<T> {
    inner: Option<JoinHandle<Result<T, MediaStoreError>>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Run `op` on the shared blocking pool
    pub fn spawn_blocking<F>(op: F) -> Self
    where
        F: FnOnce() -> Result<T, MediaStoreError> + Send + 'static,
    {
        Self {
            inner: Some(tokio::task::spawn_blocking(op)),
        }
    }
}

impl<T> TaskHandle<T> {
    pub fn cancel(mut self) {
        if let Some(handle) = self.inner.take() {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, MediaStoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(handle) = self.inner.as_mut() else {
            return Poll::Ready(Err(MediaStoreError::Cancelled));
        };

        match Pin::new(handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(joined) => {
                self.inner = None;
                Poll::Ready(match joined {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(MediaStoreError::Cancelled),
                    Err(e) => Err(MediaStoreError::Other(format!("Task join error: {}", e))),
                })
            }
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take() {
            handle.abort();
        }
    }
}
