//! Fixed-capacity pool of execution tokens.
//!
//! The pool is a bounded MPSC queue pre-filled with `capacity` [`Token`]s and
//! behaves as a counting semaphore whose permits carry a slot index. A token is
//! either resident in the queue or held by exactly one running worker; it is
//! not `Clone`, so it can be neither duplicated nor conjured up.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::error::{FlightError, Result};
use crate::metrics;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, trace};

/// One unit of concurrency.
#[derive(Debug, PartialEq, Eq)]
pub struct Token {
    slot: usize,
}

impl Token {
    /// Pool-relative index of this token.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

pub struct TokenPool {
    tx: mpsc::Sender<Token>,
    rx: Mutex<mpsc::Receiver<Token>>,
    capacity: usize,
}

impl TokenPool {
    /// Create a pool holding `capacity` tokens (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        for slot in 0..capacity {
            // The channel is sized to hold every token.
            let _ = tx.try_send(Token { slot });
        }
        metrics::update_tokens_available(capacity);

        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Wait until a token is resident and check it out.
    pub async fn acquire(&self) -> Result<Token> {
        let token = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(FlightError::Shutdown)?;
        trace!("Token {} checked out", token.slot);
        metrics::update_tokens_available(self.available());
        Ok(token)
    }

    /// Check out a token if one is resident right now.
    pub fn try_acquire(&self) -> Option<Token> {
        let token = self.rx.try_lock().ok()?.try_recv().ok()?;
        metrics::update_tokens_available(self.available());
        Some(token)
    }

    /// Return a checked-out token.
    pub fn release(&self, token: Token) {
        let slot = token.slot;
        if let Err(e) = self.tx.try_send(token) {
            error!("Token {} could not be returned to the pool: {}", slot, e);
            return;
        }
        trace!("Token {} returned", slot);
        metrics::update_tokens_available(self.available());
    }

    /// Wait until every token is back in the pool.
    ///
    /// All tokens are checked out and immediately returned, so the pool is
    /// left full and usable.
    pub async fn drain(&self) -> Result<()> {
        // Tokens collected so far go back even if the wait is abandoned.
        let mut held = Held {
            pool: self,
            tokens: Vec::with_capacity(self.capacity),
        };
        let mut rx = self.rx.lock().await;
        while held.tokens.len() < self.capacity {
            held.tokens.push(rx.recv().await.ok_or(FlightError::Shutdown)?);
        }
        drop(rx);
        Ok(())
    }

    /// Tokens currently resident in the pool.
    pub fn available(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Tokens checked out by [`TokenPool::drain`], returned on drop.
struct Held<'a> {
    pool: &'a TokenPool,
    tokens: Vec<Token>,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.pool.release(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_prefilled_with_distinct_slots() {
        let pool = TokenPool::new(4);
        assert_eq!(pool.available(), 4);

        let mut slots = HashSet::new();
        let mut held = Vec::new();
        for _ in 0..4 {
            let token = pool.acquire().await.unwrap();
            slots.insert(token.slot());
            held.push(token);
        }
        assert_eq!(slots.len(), 4);
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());

        for token in held {
            pool.release(token);
        }
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let pool = Arc::new(TokenPool::new(1));
        let token = pool.acquire().await.unwrap();

        let p = pool.clone();
        let waiter = tokio::spawn(async move { p.acquire().await.unwrap().slot() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.release(token);
        assert_eq!(waiter.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_outstanding_tokens() {
        let pool = Arc::new(TokenPool::new(3));
        let token = pool.acquire().await.unwrap();

        let p = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            p.release(token);
        });

        let started = tokio::time::Instant::now();
        pool.drain().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_drain_returns_tokens() {
        let pool = TokenPool::new(3);
        let token = pool.acquire().await.unwrap();

        let drained = tokio::time::timeout(Duration::from_millis(100), pool.drain()).await;
        assert!(drained.is_err());
        assert_eq!(pool.available(), 2);

        pool.release(token);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let pool = TokenPool::new(0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.available(), 1);
    }
}
