//! In-app toast notifications.
//!
//! A process-wide event bus with an explicit lifecycle: callers own the bus,
//! subscribers receive toasts over a channel and unsubscribe by dropping the
//! receiver, and a bounded ring buffer keeps the most recent toasts for
//! late-mounting UI (oldest evicted on overflow). No ambient module state.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

/// Default ring-buffer capacity.
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

struct Inner {
    recent: VecDeque<Toast>,
    capacity: usize,
    subscribers: Vec<mpsc::UnboundedSender<Toast>>,
}

/// Bounded toast bus with subscribe/publish semantics.
pub struct ToastBus {
    inner: Mutex<Inner>,
}

impl ToastBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                recent: VecDeque::with_capacity(capacity),
                capacity,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Subscribe to future toasts. Dropping the receiver unsubscribes; the
    /// dead sender is pruned on the next publish.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Toast> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Publish a toast to every live subscriber and the ring buffer.
    pub fn publish(&self, level: ToastLevel, message: impl Into<String>) {
        let toast = Toast {
            level,
            message: message.into(),
        };
        let mut inner = self.lock();
        if inner.recent.len() == inner.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(toast.clone());
        inner.subscribers.retain(|tx| tx.send(toast.clone()).is_ok());
    }

    /// The most recent toasts, oldest first.
    pub fn recent(&self) -> Vec<Toast> {
        self.lock().recent.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking publisher must not wedge the whole notification
        // surface; the buffer stays usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ToastBus {
    fn default() -> Self {
        Self::new()
    }
}
