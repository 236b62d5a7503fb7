//! Notification handling
//! This module turns the push-based value channel into a single awaited value.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::core::bluetooth::error::NotificationError;

/// Single-use bridge from a notification subscription to one value.
///
/// Subscribe before triggering the push, then call [`next`](Self::next) or
/// [`next_matching`](Self::next_matching). Both consume the awaiter, which
/// drops the subscription whether or not a value arrived.
pub struct NotificationAwaiter<T> {
    receiver: broadcast::Receiver<T>,
    timeout: Option<Duration>,
}

impl<T: Clone> NotificationAwaiter<T> {
    pub fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self {
            receiver,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves with the first delivered value.
    pub async fn next(self) -> Result<T, NotificationError> {
        self.next_matching(|_| true).await
    }

    /// Resolves with the first delivered value accepted by `predicate`.
    pub async fn next_matching<P>(mut self, predicate: P) -> Result<T, NotificationError>
    where
        P: Fn(&T) -> bool,
    {
        let wait = Self::recv_matching(&mut self.receiver, predicate);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| NotificationError::Timeout(limit))?,
            None => wait.await,
        }
    }

    async fn recv_matching<P>(
        receiver: &mut broadcast::Receiver<T>,
        predicate: P,
    ) -> Result<T, NotificationError>
    where
        P: Fn(&T) -> bool,
    {
        loop {
            match receiver.recv().await {
                Ok(value) if predicate(&value) => return Ok(value),
                Ok(_) => debug!("Ignoring notification for another characteristic"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification subscriber lagged, {} values skipped", skipped);
                }
                Err(RecvError::Closed) => return Err(NotificationError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_with_first_value() {
        let (tx, rx) = broadcast::channel(8);
        let awaiter = NotificationAwaiter::new(rx);
        tx.send(1u8).unwrap();
        tx.send(2u8).unwrap();
        assert_eq!(awaiter.next().await, Ok(1));
    }

    #[tokio::test]
    async fn test_subscription_released_after_use() {
        let (tx, rx) = broadcast::channel(8);
        let awaiter = NotificationAwaiter::new(rx);
        assert_eq!(tx.receiver_count(), 1);
        tx.send(7u8).unwrap();
        awaiter.next().await.unwrap();
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_predicate_skips_other_values() {
        let (tx, rx) = broadcast::channel(8);
        let awaiter = NotificationAwaiter::new(rx);
        tx.send(1u8).unwrap();
        tx.send(42u8).unwrap();
        assert_eq!(awaiter.next_matching(|v| *v > 10).await, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_unsubscribes() {
        let (tx, rx) = broadcast::channel::<u8>(8);
        let awaiter = NotificationAwaiter::new(rx).with_timeout(Duration::from_secs(5));
        let result = awaiter.next().await;
        assert_eq!(result, Err(NotificationError::Timeout(Duration::from_secs(5))));
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_source() {
        let (tx, rx) = broadcast::channel::<u8>(8);
        drop(tx);
        assert_eq!(NotificationAwaiter::new(rx).next().await, Err(NotificationError::Closed));
    }
}
