// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-server mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::name::ServerName;

/// One async mutex per server name.
///
/// Entries are created on first use and dropped again once nobody holds or
/// waits on them, so the map only grows with concurrent activity.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: Arc<Mutex<HashMap<ServerName, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`. Not reentrant.
    pub async fn lock(&self, name: &ServerName) -> KeyedGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(name.clone()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;
        KeyedGuard {
            name: name.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Whether someone currently holds or waits for `name`.
    pub fn is_contended(&self, name: &ServerName) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.contains_key(name)
    }
}

/// Exclusive access to one server name. Released on drop.
#[derive(Debug)]
pub struct KeyedGuard {
    name: ServerName,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<ServerName, Arc<AsyncMutex<()>>>>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map still references the mutex: no holder, no waiter.
        if locks
            .get(&self.name)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.name);
        }
    }
}
