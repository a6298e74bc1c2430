//! Advisory locks keyed by task (or sweep) identifier.
//!
//! The unit of mutual exclusion is one lock per task id: it covers the whole
//! read-modify-write of a task's schedule so two concurrent attempts cannot
//! double-book the unit list. Two implementations sit behind one contract:
//! [`KeyedLocks`], an in-process expiring key map, and [`LeaseLocks`], which
//! brokers compare-and-set leases through an external [`LeaseBackend`] and
//! survives process restarts. The planning service never hard-wires either.
//!
//! Failing to acquire is recoverable, not fatal. Locks expire after their
//! TTL so a crashed holder cannot wedge a key forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::clock::Clock;
use crate::error::LockError;

/// Advisory lock provider.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire the lock for `key` with the given time-to-live.
    ///
    /// With `try_once` the first refusal returns [`LockError::Busy`];
    /// otherwise acquisition retries with bounded backoff until it succeeds,
    /// runs out of attempts, or `cancel` fires.
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        try_once: bool,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError>;
}

/// A held advisory lock. Dropping the guard without calling [`release`]
/// leaves the key held until its TTL expires.
///
/// [`release`]: LockGuard::release
#[async_trait]
pub trait LockGuard: Send {
    fn key(&self) -> &str;

    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Release a guard, logging a failure instead of surfacing it so a release
/// problem never masks the locked operation's own result.
pub async fn release_or_warn(guard: Box<dyn LockGuard>) {
    let key = guard.key().to_owned();
    if let Err(error) = guard.release().await {
        warn!(key = %key, %error, "failed to release advisory lock");
    }
}

#[derive(Debug, Clone)]
struct HeldEntry {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// In-process lock provider: a mutex-guarded map of held keys with expiry.
pub struct KeyedLocks {
    clock: Arc<dyn Clock>,
    held: Arc<Mutex<HashMap<String, HeldEntry>>>,
    backoff: std::time::Duration,
    attempts: u32,
}

impl KeyedLocks {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            held: Arc::new(Mutex::new(HashMap::new())),
            backoff: std::time::Duration::from_millis(250),
            attempts: 20,
        }
    }

    pub fn with_backoff(mut self, backoff: std::time::Duration, attempts: u32) -> Self {
        self.backoff = backoff;
        self.attempts = attempts;
        self
    }

    /// Take the key if it is free or its holder's TTL has lapsed.
    fn try_take(&self, key: &str, ttl: Duration) -> Option<String> {
        let now = self.clock.now();
        let mut held = self.held.lock().unwrap();
        match held.get(key) {
            Some(entry) if entry.expires_at > now => None,
            _ => {
                let owner = uuid::Uuid::new_v4().to_string();
                held.insert(
                    key.to_owned(),
                    HeldEntry {
                        owner: owner.clone(),
                        expires_at: now + ttl,
                    },
                );
                Some(owner)
            }
        }
    }
}

#[async_trait]
impl LockProvider for KeyedLocks {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        try_once: bool,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        let mut attempt = 0;
        loop {
            if let Some(owner) = self.try_take(key, ttl) {
                return Ok(Box::new(KeyedGuard {
                    key: key.to_owned(),
                    owner,
                    held: Arc::clone(&self.held),
                }));
            }
            attempt += 1;
            if try_once || attempt >= self.attempts {
                return Err(LockError::Busy(key.to_owned()));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

struct KeyedGuard {
    key: String,
    owner: String,
    held: Arc<Mutex<HashMap<String, HeldEntry>>>,
}

#[async_trait]
impl LockGuard for KeyedGuard {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut held = self.held.lock().unwrap();
        // Only remove the entry while we still own it; after expiry another
        // holder may have taken the key.
        if held.get(&self.key).is_some_and(|entry| entry.owner == self.owner) {
            held.remove(&self.key);
        }
        Ok(())
    }
}

/// Externally-brokered lease storage with compare-and-set semantics.
///
/// Implementations must make `try_acquire` atomic: the lease is taken only
/// when the key is absent or its previous holder's TTL has lapsed, and
/// `release` drops the lease only while `owner` still holds it.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration)
        -> Result<bool, LockError>;

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError>;
}

/// Lease-based lock provider for multi-process deployments.
pub struct LeaseLocks<B: LeaseBackend> {
    backend: Arc<B>,
    backoff: std::time::Duration,
    attempts: u32,
}

impl<B: LeaseBackend> LeaseLocks<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            backoff: std::time::Duration::from_millis(250),
            attempts: 20,
        }
    }

    pub fn with_backoff(mut self, backoff: std::time::Duration, attempts: u32) -> Self {
        self.backoff = backoff;
        self.attempts = attempts;
        self
    }
}

#[async_trait]
impl<B: LeaseBackend + 'static> LockProvider for LeaseLocks<B> {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        try_once: bool,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        let owner = uuid::Uuid::new_v4().to_string();
        let mut attempt = 0;
        loop {
            if self.backend.try_acquire(key, &owner, ttl).await? {
                return Ok(Box::new(LeaseGuard {
                    key: key.to_owned(),
                    owner,
                    backend: Arc::clone(&self.backend) as Arc<dyn LeaseBackend>,
                }));
            }
            attempt += 1;
            if try_once || attempt >= self.attempts {
                return Err(LockError::Busy(key.to_owned()));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

struct LeaseGuard {
    key: String,
    owner: String,
    backend: Arc<dyn LeaseBackend>,
}

#[async_trait]
impl LockGuard for LeaseGuard {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        self.backend.release(&self.key, &self.owner).await
    }
}

#[derive(Debug, Clone)]
struct LeaseRecord {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// Reference [`LeaseBackend`] keeping leases in process memory.
///
/// Stands in for a real broker in tests and single-process deployments; the
/// compare-and-set contract is the same one a remote backend must honor.
pub struct InMemoryLeaseBackend {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<String, LeaseRecord>>,
}

impl InMemoryLeaseBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaseBackend for InMemoryLeaseBackend {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap();
        match leases.get(key) {
            Some(record) if record.expires_at > now && record.owner != owner => Ok(false),
            _ => {
                leases.insert(
                    key.to_owned(),
                    LeaseRecord {
                        owner: owner.to_owned(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(key).is_some_and(|record| record.owner == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn keyed_lock_excludes_a_second_holder() {
        let locks = KeyedLocks::new(clock());
        let cancel = CancellationToken::new();
        let guard = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        let second = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await;
        assert!(matches!(second, Err(LockError::Busy(_))));
        guard.release().await.unwrap();
        locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let locks = KeyedLocks::new(clock());
        let cancel = CancellationToken::new();
        let _a = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        let _b = locks
            .acquire("task-2", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_keyed_lock_can_be_taken_over() {
        let clock = clock();
        let locks = KeyedLocks::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let cancel = CancellationToken::new();
        let _stale = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        clock.advance(Duration::seconds(31));
        locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_release_does_not_evict_the_new_holder() {
        let clock = clock();
        let locks = KeyedLocks::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let cancel = CancellationToken::new();
        let stale = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        clock.advance(Duration::seconds(31));
        let _current = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        stale.release().await.unwrap();
        let third = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await;
        assert!(matches!(third, Err(LockError::Busy(_))));
    }

    #[tokio::test]
    async fn bounded_wait_acquires_once_the_holder_releases() {
        let locks = Arc::new(
            KeyedLocks::new(clock()).with_backoff(std::time::Duration::from_millis(5), 50),
        );
        let cancel = CancellationToken::new();
        let guard = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                locks
                    .acquire("task-1", Duration::seconds(30), false, &cancel)
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        guard.release().await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancellation_aborts_a_lock_wait() {
        let locks = Arc::new(
            KeyedLocks::new(clock()).with_backoff(std::time::Duration::from_millis(50), 100),
        );
        let cancel = CancellationToken::new();
        let _guard = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                locks
                    .acquire("task-1", Duration::seconds(30), false, &cancel)
                    .await
            })
        };
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(LockError::Cancelled)));
    }

    #[tokio::test]
    async fn lease_locks_honor_the_cas_contract() {
        let backend = Arc::new(InMemoryLeaseBackend::new(clock()));
        let locks = LeaseLocks::new(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let guard = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
        let second = locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await;
        assert!(matches!(second, Err(LockError::Busy(_))));
        guard.release().await.unwrap();
        locks
            .acquire("task-1", Duration::seconds(30), true, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let clock = clock();
        let backend = Arc::new(InMemoryLeaseBackend::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let locks = LeaseLocks::new(backend);
        let cancel = CancellationToken::new();
        let _stale = locks
            .acquire("task-1", Duration::seconds(10), true, &cancel)
            .await
            .unwrap();
        clock.advance(Duration::seconds(11));
        locks
            .acquire("task-1", Duration::seconds(10), true, &cancel)
            .await
            .unwrap();
    }
}
