//! Single-use hand-off between the callback handler and the waiting session.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rendezvous already completed")]
pub struct AlreadyCompleted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Nothing arrived within the deadline.
    TimedOut,
    /// The sending side was dropped without completing.
    Abandoned,
}

/// Producer half. Exactly one `complete` call succeeds; later ones get
/// `AlreadyCompleted` and their value is dropped.
pub struct Rendezvous<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

/// Consumer half, held by whoever waits for the outcome.
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

pub fn channel<T>() -> (Rendezvous<T>, Waiter<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Rendezvous {
            slot: Mutex::new(Some(tx)),
        },
        Waiter { rx },
    )
}

impl<T> Rendezvous<T> {
    pub fn complete(&self, value: T) -> Result<(), AlreadyCompleted> {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(AlreadyCompleted)?;
        // a dropped waiter still counts as completion; nobody may complete twice
        let _ = sender.send(value);
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).is_none()
    }
}

impl<T> Waiter<T> {
    pub async fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_completion_wins() {
        let (rv, waiter) = channel::<u32>();
        assert!(!rv.is_completed());
        rv.complete(1).unwrap();
        assert_eq!(rv.complete(2), Err(AlreadyCompleted));
        assert!(rv.is_completed());
        assert_eq!(waiter.wait(Duration::from_secs(1)).await, Ok(1));
    }

    #[tokio::test]
    async fn wait_times_out_without_completion() {
        let (_rv, waiter) = channel::<u32>();
        assert_eq!(waiter.wait(Duration::from_millis(20)).await, Err(WaitError::TimedOut));
    }

    #[tokio::test]
    async fn dropped_producer_abandons_waiter() {
        let (rv, waiter) = channel::<u32>();
        drop(rv);
        assert_eq!(waiter.wait(Duration::from_secs(1)).await, Err(WaitError::Abandoned));
    }

    #[tokio::test]
    async fn concurrent_completions_deliver_exactly_one() {
        let (rv, waiter) = channel::<usize>();
        let rv = std::sync::Arc::new(rv);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let rv = rv.clone();
                tokio::spawn(async move { rv.complete(i).is_ok() })
            })
            .collect();
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!(waiter.wait(Duration::from_secs(1)).await.is_ok());
    }
}
