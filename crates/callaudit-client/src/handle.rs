//! Handle to a detached audited call.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use callaudit_core::{panic_message, RequestId};
use tokio::task::JoinHandle;

use crate::error::ClientError;

/// Future resolving to the outcome of a call running on its own task.
///
/// The `Initiated` event has already been published when the handle is
/// returned. Dropping the handle detaches the task: the call still runs to
/// completion and its events are still published. `cancel` aborts the task
/// at its next suspension point; events already published stay published.
#[derive(Debug)]
pub struct CallHandle<T> {
    request_id: RequestId,
    task: JoinHandle<Result<T, ClientError>>,
}

impl<T> CallHandle<T> {
    pub(crate) fn new(request_id: RequestId, task: JoinHandle<Result<T, ClientError>>) -> Self {
        Self { request_id, task }
    }

    /// Correlation id of the call.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Aborts the call.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) if e.is_cancelled() => {
                Poll::Ready(Err(ClientError::Cancelled { request_id: this.request_id.clone() }))
            },
            Poll::Ready(Err(e)) => {
                let message = match e.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(e) => e.to_string(),
                };
                let request_id = this.request_id.clone();
                Poll::Ready(Err(ClientError::Panicked { request_id, message }))
            },
        }
    }
}
