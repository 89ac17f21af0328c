use crate::error::DbError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Completion channel of one storage operation.
///
/// Resolves with the operation's result. A request whose work was discarded
/// without running (queue overflow, shutdown) resolves with
/// [`DbError::Aborted`].
#[derive(Debug)]
pub struct Request<T> {
    rx: oneshot::Receiver<Result<T, DbError>>,
}

/// Sending half of a [`Request`].
#[derive(Debug)]
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, DbError>>,
}

impl<T> Completion<T> {
    pub fn send(self, result: Result<T, DbError>) {
        // receiver dropped: nobody is waiting
        let _ = self.tx.send(result);
    }
}

fn dropped() -> DbError {
    DbError::Aborted("request discarded before completion".to_string())
}

impl<T> Request<T> {
    pub fn channel() -> (Completion<T>, Request<T>) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, Request { rx })
    }

    /// A request that is already settled.
    pub fn settled(result: Result<T, DbError>) -> Self {
        let (completion, request) = Self::channel();
        completion.send(result);
        request
    }

    /// Takes the result if the operation finished, without waiting.
    pub fn try_take(&mut self) -> Option<Result<T, DbError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T, DbError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped())))
    }
}

#[cfg(test)]
mod tests {
    use super::Request;
    use crate::error::DbErrorCode;

    #[tokio::test]
    async fn settled_request_resolves_immediately() {
        let request = Request::settled(Ok(7));
        assert_eq!(request.await.expect("value"), 7);
    }

    #[tokio::test]
    async fn dropped_completion_resolves_as_aborted() {
        let (completion, request) = Request::<()>::channel();
        drop(completion);
        let err = request.await.expect_err("aborted");
        assert_eq!(err.code(), DbErrorCode::Aborted);
    }

    #[test]
    fn try_take_reports_pending_then_value() {
        let (completion, mut request) = Request::channel();
        assert!(request.try_take().is_none());
        completion.send(Ok("done"));
        assert_eq!(request.try_take().expect("settled").expect("ok"), "done");
    }
}
