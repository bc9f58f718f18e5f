// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A [Gate] tracks in-flight background work so that shutdown can wait for it.
//!
//! Work enters the gate and holds a [GateGuard] for as long as it runs. Once
//! [Gate::close] is called no new work may enter, and `close` resolves only
//! after every outstanding guard has been dropped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Returned when trying to enter a [Gate] which has been closed
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GateClosed;

impl std::fmt::Display for GateClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gate is closed")
    }
}

impl std::error::Error for GateClosed {}

#[derive(Debug, Default)]
struct GateInner {
    closed: AtomicBool,
    inside: AtomicUsize,
    drained: Notify,
}

/// A shutdown barrier for in-flight work
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Create a new, open, gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate. The returned guard must be held for the duration of the work
    ///
    /// Returns [Err(GateClosed)] if the gate has already been closed
    pub fn enter(&self) -> Result<GateGuard, GateClosed> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(GateClosed);
        }
        self.inner.inside.fetch_add(1, Ordering::AcqRel);
        let guard = GateGuard {
            inner: self.inner.clone(),
        };
        // close() may have raced with the increment
        if self.inner.closed.load(Ordering::Acquire) {
            drop(guard);
            return Err(GateClosed);
        }
        Ok(guard)
    }

    /// Determine if the gate has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The number of guards currently held
    pub fn inside(&self) -> usize {
        self.inner.inside.load(Ordering::Acquire)
    }

    /// Close the gate and wait for all in-flight work to drain
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.inner.inside.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Proof of entry into a [Gate]. Dropping it leaves the gate
#[derive(Debug)]
pub struct GateGuard {
    inner: Arc<GateInner>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if self.inner.inside.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}
