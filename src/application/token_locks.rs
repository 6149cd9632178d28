//! Per-token job exclusion
//!
//! A bundle or sell job holds its token's guard from split until it reaches
//! a terminal state. A second job on the same token is refused, not queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

fn guard_map(locks: &LockMap) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    locks.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct TokenLocks {
    locks: LockMap,
}

/// Held for a job's lifetime; dropping it releases the token
#[derive(Debug)]
pub struct TokenGuard {
    token_address: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl TokenGuard {
    pub fn token_address(&self) -> &str {
        &self.token_address
    }
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Prune the entry unless another caller still holds its lock handle
        let mut locks = guard_map(&self.locks);
        if locks
            .get(&self.token_address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.token_address);
        }
        tracing::debug!("Released job lock for {}", self.token_address);
    }
}

impl TokenLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, token_address: &str) -> Arc<tokio::sync::Mutex<()>> {
        guard_map(&self.locks)
            .entry(token_address.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Take the token's lock, or `None` if another job already holds it
    pub fn try_acquire(&self, token_address: &str) -> Option<TokenGuard> {
        let guard = self.lock_for(token_address).try_lock_owned().ok()?;
        tracing::debug!("Acquired job lock for {}", token_address);
        Some(TokenGuard {
            token_address: token_address.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        })
    }

    pub fn is_locked(&self, token_address: &str) -> bool {
        guard_map(&self.locks)
            .get(token_address)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Tokens with a live lock entry
    pub fn tracked(&self) -> usize {
        guard_map(&self.locks).len()
    }
}
