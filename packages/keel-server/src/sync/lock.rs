//! Named, token-guarded locks with FIFO hand-off.
//!
//! Each name maps to a fair async mutex plus the current holder's token
//! and re-entry depth. Only the holding token may unlock; anything else is
//! a silent no-op. Entries with no holder and no waiters are evicted so the
//! table does not grow with every name ever used.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

/// Opaque per-acquisition token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Fresh random (v4) token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {timeout_ms}ms waiting for lock `{name}`")]
    Timeout { name: String, timeout_ms: u64 },
}

struct Holder {
    token: LockToken,
    depth: u32,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
struct LockEntry {
    gate: Arc<tokio::sync::Mutex<()>>,
    holder: Mutex<Option<Holder>>,
}

impl LockEntry {
    /// Bump the depth if `token` already holds this entry.
    fn reenter(&self, token: LockToken) -> bool {
        match self.holder.lock().as_mut() {
            Some(holder) if holder.token == token => {
                holder.depth += 1;
                true
            }
            _ => false,
        }
    }

    fn install(&self, token: LockToken, guard: OwnedMutexGuard<()>) {
        *self.holder.lock() = Some(Holder {
            token,
            depth: 1,
            _guard: guard,
        });
    }

    fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

/// Process-wide table of named locks.
#[derive(Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<String, Arc<LockEntry>>>,
}

impl LockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `name` is free (or already held by `token`) and take it.
    pub async fn lock(&self, name: &str, token: LockToken) {
        let entry = self.entry(name);
        if entry.reenter(token) {
            debug!(lock = name, %token, "lock re-entered");
            return;
        }
        let started = Instant::now();
        let guard = Arc::clone(&entry.gate).lock_owned().await;
        entry.install(token, guard);
        record_wait(name, token, started);
    }

    /// Like [`lock`](Self::lock), but give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock was not obtained in time.
    pub async fn try_lock_for(
        &self,
        name: &str,
        token: LockToken,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let entry = self.entry(name);
        if entry.reenter(token) {
            debug!(lock = name, %token, "lock re-entered");
            return Ok(());
        }
        let started = Instant::now();
        let acquired = tokio::time::timeout(timeout, Arc::clone(&entry.gate).lock_owned()).await;
        if let Ok(guard) = acquired {
            entry.install(token, guard);
            record_wait(name, token, started);
            return Ok(());
        }
        drop(entry);
        self.evict_if_idle(name);
        debug!(lock = name, %token, "lock wait timed out");
        Err(LockError::Timeout {
            name: name.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Release one level of `name` if `token` holds it.
    ///
    /// Returns `false` (and changes nothing) for any other token or for an
    /// unknown name.
    pub fn unlock(&self, name: &str, token: LockToken) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(name) else {
            return false;
        };
        let finished = {
            let mut holder = entry.holder.lock();
            let finished = match holder.as_mut() {
                Some(current) if current.token == token => {
                    current.depth -= 1;
                    current.depth == 0
                }
                _ => return false,
            };
            if finished {
                *holder = None;
            }
            finished
        };
        if finished && Arc::strong_count(entry) == 1 {
            entries.remove(name);
        }
        debug!(lock = name, %token, finished, "lock released");
        true
    }

    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        self.entries
            .lock()
            .get(name)
            .is_some_and(|entry| entry.is_held())
    }

    /// Number of names currently tracked (held or waited on).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// [`lock`](Self::lock) returning a guard that unlocks on drop.
    pub async fn lock_guard(self: &Arc<Self>, name: impl Into<String>, token: LockToken) -> LockGuard {
        let name = name.into();
        self.lock(&name, token).await;
        LockGuard {
            registry: Arc::clone(self),
            name,
            token,
        }
    }

    /// [`try_lock_for`](Self::try_lock_for) returning a guard that unlocks on drop.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the lock was not obtained in time.
    pub async fn try_lock_guard_for(
        self: &Arc<Self>,
        name: impl Into<String>,
        token: LockToken,
        timeout: Duration,
    ) -> Result<LockGuard, LockError> {
        let name = name.into();
        self.try_lock_for(&name, token, timeout).await?;
        Ok(LockGuard {
            registry: Arc::clone(self),
            name,
            token,
        })
    }

    fn entry(&self, name: &str) -> Arc<LockEntry> {
        Arc::clone(self.entries.lock().entry(name.to_string()).or_default())
    }

    fn evict_if_idle(&self, name: &str) {
        let mut entries = self.entries.lock();
        let idle = entries
            .get(name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1 && !entry.is_held());
        if idle {
            entries.remove(name);
        }
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

fn record_wait(name: &str, token: LockToken, started: Instant) {
    let waited_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("keel_lock_wait_ms").record(waited_ms);
    debug!(lock = name, %token, waited_ms, "lock acquired");
}

/// Holds one level of a named lock; unlocks when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    registry: Arc<LockRegistry>,
    name: String,
    token: LockToken,
}

impl LockGuard {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn token(&self) -> LockToken {
        self.token
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry.unlock(&self.name, self.token);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn second_token_waits_for_unlock() {
        let registry = Arc::new(LockRegistry::new());
        let first = LockToken::new();
        registry.lock("orders", first).await;

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = tokio::spawn({
            let registry = Arc::clone(&registry);
            let acquired = Arc::clone(&acquired);
            async move {
                let second = LockToken::new();
                registry.lock("orders", second).await;
                acquired.store(true, Ordering::SeqCst);
                assert!(registry.unlock("orders", second));
            }
        });

        settle().await;
        assert!(!acquired.load(Ordering::SeqCst));

        assert!(registry.unlock("orders", first));
        waiter.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!registry.is_locked("orders"));
    }

    #[tokio::test]
    async fn unlock_with_wrong_token_is_a_no_op() {
        let registry = LockRegistry::new();
        let holder = LockToken::new();
        registry.lock("stock", holder).await;

        assert!(!registry.unlock("stock", LockToken::new()));
        assert!(registry.is_locked("stock"));
        assert!(!registry.unlock("missing", holder));

        assert!(registry.unlock("stock", holder));
        assert!(!registry.is_locked("stock"));
    }

    #[tokio::test]
    async fn same_token_reenters_and_counts_depth() {
        let registry = LockRegistry::new();
        let token = LockToken::new();
        registry.lock("a", token).await;
        registry.lock("a", token).await;

        assert!(registry.unlock("a", token));
        assert!(registry.is_locked("a"));
        assert!(registry.unlock("a", token));
        assert!(!registry.is_locked("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out_and_leaves_holder_alone() {
        let registry = LockRegistry::new();
        let holder = LockToken::new();
        registry.lock("report", holder).await;

        let err = registry
            .try_lock_for("report", LockToken::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LockError::Timeout {
                name: "report".into(),
                timeout_ms: 50
            }
        );
        assert!(registry.is_locked("report"));
        assert_eq!(registry.len(), 1);

        registry.unlock("report", holder);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn idle_entries_are_evicted() {
        let registry = LockRegistry::new();
        for i in 0..100 {
            let token = LockToken::new();
            let name = format!("user-{i}");
            registry.lock(&name, token).await;
            registry.unlock(&name, token);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let registry = Arc::new(LockRegistry::new());
        let holder = LockToken::new();
        registry.lock("queue", holder).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for id in 1..=3 {
            let registry = Arc::clone(&registry);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let token = LockToken::new();
                registry.lock("queue", token).await;
                order.lock().push(id);
                registry.unlock("queue", token);
            }));
            settle().await;
        }

        registry.unlock("queue", holder);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn guard_unlocks_on_drop() {
        let registry = Arc::new(LockRegistry::new());
        {
            let guard = registry.lock_guard("synchronized-cart", LockToken::new()).await;
            assert_eq!(guard.name(), "synchronized-cart");
            assert!(registry.is_locked("synchronized-cart"));
        }
        assert!(!registry.is_locked("synchronized-cart"));
        assert!(registry.is_empty());
    }
}
