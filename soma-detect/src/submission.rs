//! Per-frame result handle

use soma_core::{DetectError, DetectedFrame};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Terminal outcome of one submitted frame
pub type Outcome = Result<DetectedFrame, DetectError>;

/// Single-assignment handle to the outcome of a submitted frame.
///
/// Resolves exactly once, either by awaiting it or through
/// [`Submission::blocking_wait`] from a plain thread.
#[derive(Debug)]
#[must_use = "a submission does nothing unless its outcome is awaited"]
pub struct Submission {
    rx: oneshot::Receiver<Outcome>,
}

impl Submission {
    pub(crate) fn new(rx: oneshot::Receiver<Outcome>) -> Self {
        Self { rx }
    }

    /// A submission that already failed
    pub(crate) fn failed(err: DetectError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Block the current thread until the outcome is available.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_wait(self) -> Outcome {
        self.rx.blocking_recv().unwrap_or(Err(DetectError::ShuttingDown))
    }

    /// Take the outcome if it is already available.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DetectError::ShuttingDown)),
        }
    }
}

impl Future for Submission {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DetectError::ShuttingDown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_submission_resolves_immediately() {
        let submission = Submission::failed(DetectError::ShuttingDown);
        assert_eq!(submission.await.unwrap_err(), DetectError::ShuttingDown);
    }

    #[tokio::test]
    async fn test_dropped_sender_maps_to_shutdown() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        drop(tx);
        let submission = Submission::new(rx);
        assert_eq!(submission.await.unwrap_err(), DetectError::ShuttingDown);
    }

    #[test]
    fn test_try_outcome() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let mut submission = Submission::new(rx);
        assert!(submission.try_outcome().is_none());
        tx.send(Err(DetectError::worker("boom"))).unwrap();
        assert_eq!(
            submission.try_outcome().unwrap().unwrap_err(),
            DetectError::worker("boom")
        );
    }

    #[test]
    fn test_blocking_wait_from_thread() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let submission = Submission::new(rx);
        let waiter = std::thread::spawn(move || submission.blocking_wait());
        tx.send(Err(DetectError::ShuttingDown)).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap_err(), DetectError::ShuttingDown);
    }

    #[test]
    fn test_submission_pending_until_resolved() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let mut task = tokio_test::task::spawn(Submission::new(rx));
        tokio_test::assert_pending!(task.poll());

        tx.send(Err(DetectError::worker("late"))).unwrap();
        assert!(task.is_woken());
        let outcome = tokio_test::assert_ready!(task.poll());
        assert_eq!(outcome.unwrap_err(), DetectError::worker("late"));
    }
}
