//! Operation lock
//!
//! Process-wide mutex serializing every topology-mutating operation.
//! At most one holder at a time; contenders get the current holder's
//! identity back and fail fast. Readers never touch this lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identity of the current lock holder.
#[derive(Debug, Clone)]
pub struct HolderInfo {
    /// Operation name, e.g. `promote`.
    pub operation: &'static str,
    /// Monotonic id, unique per acquisition for the process lifetime.
    pub id: u64,
    /// When the holder acquired the lock.
    pub acquired_at: DateTime<Utc>,
    /// The holder's global deadline.
    pub deadline: Duration,
}

/// The process-wide operation lock. Created once at startup, never
/// destroyed.
#[derive(Debug, Default)]
pub struct OperationLock {
    holder: Mutex<Option<HolderInfo>>,
    next_id: AtomicU64,
}

impl OperationLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire exclusively, failing fast with the current holder's identity
    /// on contention.
    pub fn try_acquire(
        self: &Arc<Self>,
        operation: &'static str,
        deadline: Duration,
    ) -> Result<OperationGuard, HolderInfo> {
        let mut holder = self.holder.lock().unwrap();
        if let Some(existing) = holder.as_ref() {
            return Err(existing.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = HolderInfo {
            operation,
            id,
            acquired_at: Utc::now(),
            deadline,
        };
        *holder = Some(info);
        Ok(OperationGuard {
            lock: Arc::clone(self),
            operation,
            id,
        })
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<HolderInfo> {
        self.holder.lock().unwrap().clone()
    }

    fn release(&self, id: u64) {
        let mut holder = self.holder.lock().unwrap();
        if holder.as_ref().map(|h| h.id) == Some(id) {
            *holder = None;
        }
    }
}

/// RAII guard: dropping it releases the lock. Every exit path of an
/// orchestrated operation (success, error, deadline) releases.
#[derive(Debug)]
pub struct OperationGuard {
    lock: Arc<OperationLock>,
    pub operation: &'static str,
    pub id: u64,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.lock.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(180);

    #[test]
    fn test_acquire_and_release() {
        let lock = OperationLock::new();
        {
            let guard = lock.try_acquire("promote", DEADLINE).unwrap();
            assert_eq!(guard.operation, "promote");
            assert!(lock.holder().is_some());
        }
        assert!(lock.holder().is_none());
    }

    #[test]
    fn test_contention_fails_fast_with_holder_identity() {
        let lock = OperationLock::new();
        let _guard = lock.try_acquire("promote", DEADLINE).unwrap();

        let err = lock.try_acquire("demote_all", DEADLINE).unwrap_err();
        assert_eq!(err.operation, "promote");
    }

    #[test]
    fn test_reacquire_after_release() {
        let lock = OperationLock::new();
        let first = lock.try_acquire("promote", DEADLINE).unwrap();
        let first_id = first.id;
        drop(first);

        let second = lock.try_acquire("demote_all", DEADLINE).unwrap();
        assert!(second.id > first_id);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let lock = OperationLock::new();
        let mut last = None;
        for _ in 0..3 {
            let guard = lock.try_acquire("add_host", DEADLINE).unwrap();
            if let Some(previous) = last {
                assert!(guard.id > previous);
            }
            last = Some(guard.id);
        }
    }
}
