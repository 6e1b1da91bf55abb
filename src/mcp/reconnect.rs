// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exponential-backoff reconnection timers.
//!
//! Each server has at most one pending timer. A timer is a spawned task that
//! races a [`CancellationToken`] against the backoff sleep; cancelling the
//! token (on removal, success, or shutdown) guarantees the callback never
//! runs afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::ReconnectionConfig;
use super::name::ServerName;

/// Delay before reconnection attempt `attempt` (1-indexed).
///
/// `min(initial × multiplier^(attempt−1), max)`.
pub fn backoff_delay(config: &ReconnectionConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = raw.min(config.max_delay_ms as f64);
    Duration::from_millis(capped.max(0.0).round() as u64)
}

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    attempt: u32,
    token: CancellationToken,
}

type PendingMap = Arc<Mutex<HashMap<ServerName, PendingTimer>>>;

/// Tracks the pending reconnection timer of every server.
#[derive(Debug, Default)]
pub struct ReconnectScheduler {
    pending: PendingMap,
    next_id: AtomicU64,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `name`, replacing any timer already pending.
    ///
    /// After `delay`, `on_fire` is called with the timer's token. The callback
    /// should re-check `token.is_cancelled()` once it has serialized with
    /// other work on the server, since cancellation may land while it waits.
    pub fn schedule<F, Fut>(&self, name: &ServerName, attempt: u32, delay: Duration, on_fire: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = pending.insert(
                name.clone(),
                PendingTimer {
                    id,
                    attempt,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
        }

        let pending = Arc::clone(&self.pending);
        let name = name.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::trace!(server = %name, attempt, "reconnection timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
                        if pending.get(&name).is_some_and(|t| t.id == id) {
                            pending.remove(&name);
                        }
                    }
                    if !token.is_cancelled() {
                        on_fire(token).await;
                    }
                }
            }
        });
    }

    /// Cancel the pending timer for `name`. Returns whether one was pending.
    pub fn cancel(&self, name: &ServerName) -> bool {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        for timer in &drained {
            timer.token.cancel();
        }
        drained.len()
    }

    pub fn is_pending(&self, name: &ServerName) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Attempt number of the pending timer, if any.
    pub fn pending_attempt(&self, name: &ServerName) -> Option<u32> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|t| t.attempt)
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
