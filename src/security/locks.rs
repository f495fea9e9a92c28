// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! The in-memory activity store and the manual clock sit behind `RwLock`s.
//! A panic elsewhere while one of them is held must not take the idle guard
//! down with it: the guard would then never redirect. These helpers log the
//! poisoning and hand back the guard anyway.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "farmgate::locks",
            event = "LOCK_POISONED_READ",
            "session state lock was poisoned; continuing with last written value"
        );
        poisoned.into_inner()
    })
}

/// Acquire a write lock, recovering from poisoning.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "farmgate::locks",
            event = "LOCK_POISONED_WRITE",
            "session state lock was poisoned; continuing with last written value"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_and_write() {
        let lock = RwLock::new(900u64);
        assert_eq!(*resilient_read(&lock), 900);
        *resilient_write(&lock) = 899;
        assert_eq!(*resilient_read(&lock), 899);
    }

    #[test]
    fn test_recovers_after_poisoning() {
        let lock = Arc::new(RwLock::new(vec!["lastActivity".to_string()]));
        let poisoner = Arc::clone(&lock);

        let _ = thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the store lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(resilient_read(&lock).len(), 1);
        resilient_write(&lock).clear();
        assert!(resilient_read(&lock).is_empty());
    }
}
