// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helpers that recover from poisoning.
//!
//! The configuration, session state and rate-limit table are shared between
//! request handlers and the session timer task. A panic in one of them must
//! not turn every later access into a second panic, so the guard is
//! recovered and the event is logged instead.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "dashguard::locks",
            event = "LOCK_POISONED_READ",
            "RwLock poisoned during read; recovering possibly stale state"
        );
        poisoned.into_inner()
    })
}

#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "dashguard::locks",
            event = "LOCK_POISONED_WRITE",
            "RwLock poisoned during write; recovering possibly stale state"
        );
        poisoned.into_inner()
    })
}

#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "dashguard::locks",
            event = "LOCK_POISONED_MUTEX",
            "Mutex poisoned; recovering possibly stale state"
        );
        poisoned.into_inner()
    })
}
