//! Cross-loop coordination primitives.
//!
//! ```text
//!   sensor loop ──publish──▶ Snapshot<TemperatureSample> ──read──▶ control loop
//!   runner      ──publish──▶ Snapshot<ExecutionSnapshot> ──read──▶ service / CLI
//!   service     ──cancel───▶ CancelToken ──wakes──▶ control loop sleep
//! ```
//!
//! Loops never share mutable references.  A writer publishes whole values
//! into a snapshot cell guarded by a critical-section mutex; readers take
//! copies.  Inter-cycle waits go through [`CancelToken::sleep`], which
//! returns as soon as the token is cancelled instead of finishing the
//! full period.

use core::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use serde::{Deserialize, Serialize};

// ───────────────────────────────────────────────────────────────
// Cancellation
// ───────────────────────────────────────────────────────────────

/// Why a loop was asked to stop.  Ordered by severity; an emergency
/// request always wins over a manual one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StopReason {
    Manual = 1,
    Emergency = 2,
}

impl StopReason {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Manual),
            2 => Some(Self::Emergency),
            _ => None,
        }
    }
}

struct TokenInner {
    cancelled: AtomicBool,
    reason: AtomicU8,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

/// Cancellation token shared between a loop and whoever may stop it.
///
/// Only one task should wait on a given token at a time; each loop gets
/// its own token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: AtomicU8::new(0),
                wake: Signal::new(),
            }),
        }
    }

    /// Request a stop.  Repeated calls keep the most severe reason.
    pub fn cancel(&self, reason: StopReason) {
        self.inner.reason.fetch_max(reason as u8, Ordering::AcqRel);
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.wake.signal(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.inner.reason.load(Ordering::Acquire))
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.wake.wait().await;
        }
    }

    /// Block the calling thread for `dur` or until cancelled.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        future::block_on(future::or(
            async {
                self.cancelled().await;
                true
            },
            async {
                async_io::Timer::after(dur).await;
                self.is_cancelled()
            },
        ))
    }
}

// ───────────────────────────────────────────────────────────────
// Snapshot cell
// ───────────────────────────────────────────────────────────────

type Cell<T> = Arc<Mutex<CriticalSectionRawMutex, RefCell<T>>>;

/// Create a single-writer / multi-reader snapshot cell.
pub fn snapshot<T: Clone + Send>(initial: T) -> (Publisher<T>, Subscriber<T>) {
    let cell: Cell<T> = Arc::new(Mutex::new(RefCell::new(initial)));
    (
        Publisher { cell: cell.clone() },
        Subscriber { cell },
    )
}

/// The only handle that can replace the published value.  Not `Clone`.
pub struct Publisher<T> {
    cell: Cell<T>,
}

impl<T: Clone + Send> Publisher<T> {
    pub fn publish(&self, value: T) {
        let old = self.cell.lock(|c| c.replace(value));
        drop(old);
    }

    /// A fresh reader of this cell.
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            cell: self.cell.clone(),
        }
    }
}

/// Read side of a snapshot cell.
pub struct Subscriber<T> {
    cell: Cell<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send> Subscriber<T> {
    /// Copy of the latest published value.
    pub fn read(&self) -> T {
        self.cell.lock(|c| c.borrow().clone())
    }

    /// Inspect the latest value without cloning it.  Keep `f` short; it
    /// runs inside the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.lock(|c| f(&c.borrow()))
    }
}
