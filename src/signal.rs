//! Busy signal and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Reference-counted busy/idle signal.
///
/// Every running job holds a [`BusyGuard`]. Subscribers see `true` while at least one guard is
/// alive and `false` once the last one is dropped.
#[derive(Debug, Clone)]
pub struct BusySignal {
    inner: Arc<BusyInner>,
}

#[derive(Debug)]
struct BusyInner {
    active: Mutex<usize>,
    sender: watch::Sender<bool>,
}

impl Default for BusySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl BusySignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusyInner {
                active: Mutex::new(0),
                sender,
            }),
        }
    }

    /// A receiver for the busy state. The current value is readable immediately.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.sender.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        *self.inner.sender.borrow()
    }

    /// Marks one job as started; the job ends when the guard is dropped.
    pub fn begin(&self) -> BusyGuard {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        *active += 1;
        if *active == 1 {
            self.inner.sender.send_replace(true);
        }
        BusyGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Keeps the busy signal raised for as long as it lives.
#[derive(Debug)]
pub struct BusyGuard {
    inner: Arc<BusyInner>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.inner.sender.send_replace(false);
        }
    }
}

/// Cooperative cancellation flag shared by every unit of work of a job.
///
/// Work checks the token at the start of each page or group; operations already writing a file
/// run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
