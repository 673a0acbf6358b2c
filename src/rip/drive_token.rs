//! Exclusive access to the optical drive
//!
//! Every extraction holds a [`DrivePermit`] for its whole duration. The
//! drive serves one read stream at a time, so there is exactly one permit.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, Clone)]
pub struct DriveToken {
    permits: Arc<Semaphore>,
}

/// Held while an extraction runs; dropping it releases the drive
#[derive(Debug)]
pub struct DrivePermit {
    _permit: OwnedSemaphorePermit,
}

impl Default for DriveToken {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveToken {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the drive. Returns `None` only if the token was closed.
    pub async fn acquire(&self) -> Option<DrivePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| DrivePermit { _permit: permit })
    }

    /// Take the drive if it is free right now
    pub fn try_acquire(&self) -> Option<DrivePermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(DrivePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_holder() {
        let token = DriveToken::new();
        let permit = token.acquire().await.unwrap();
        assert!(token.is_busy());
        assert!(token.try_acquire().is_none());

        drop(permit);
        assert!(!token.is_busy());
        assert!(token.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let token = DriveToken::new();
        let permit = token.acquire().await.unwrap();

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.acquire().await.is_some() })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(permit);
        assert!(waiter.await.unwrap());
    }
}
