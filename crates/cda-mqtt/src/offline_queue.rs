//! Offline Queue for buffering messages while disconnected
//!
//! Bounded in memory; when full, the oldest message makes room for the
//! newest so the queue always holds the most recent `capacity` messages.

use crate::types::QueuedMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Bounded FIFO of messages awaiting delivery
pub struct OfflineQueue {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    messages: VecDeque<QueuedMessage>,
    evicted: u64,
}

impl OfflineQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::with_capacity(capacity),
                evicted: 0,
            }),
            capacity,
        }
    }

    /// Append a message, evicting the oldest one if the queue is full
    ///
    /// Returns the evicted message, if any.
    pub fn push(&self, message: QueuedMessage) -> Option<QueuedMessage> {
        let mut inner = self.inner.lock();
        let evicted = if inner.messages.len() >= self.capacity {
            inner.evicted += 1;
            inner.messages.pop_front()
        } else {
            None
        };
        inner.messages.push_back(message);

        if evicted.is_some() {
            warn!(
                "Offline queue full ({} messages), dropped oldest",
                self.capacity
            );
        } else {
            debug!("Queued message ({} pending)", inner.messages.len());
        }
        evicted
    }

    /// Take the oldest message
    pub fn pop_front(&self) -> Option<QueuedMessage> {
        self.inner.lock().messages.pop_front()
    }

    /// Put a message back at the head after a failed send
    ///
    /// If newer messages filled the queue in the meantime, the returned
    /// message is the oldest and is dropped instead.
    pub fn requeue_front(&self, message: QueuedMessage) -> bool {
        let mut inner = self.inner.lock();
        if inner.messages.len() >= self.capacity {
            inner.evicted += 1;
            warn!("Offline queue full, dropped message that failed to send");
            return false;
        }
        inner.messages.push_front(message);
        true
    }

    /// Peek at the oldest messages without removing them
    pub fn peek(&self, limit: usize) -> Vec<QueuedMessage> {
        let inner = self.inner.lock();
        inner.messages.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every queued message, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.messages.len();
        inner.messages.clear();
        if dropped > 0 {
            info!("Offline queue cleared ({} messages)", dropped);
        }
        dropped
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pending_count: inner.messages.len(),
            capacity: self.capacity,
            evicted: inner.evicted,
            oldest: inner.messages.front().map(|m| m.created_at),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Number of pending messages
    pub pending_count: usize,

    /// Maximum messages held
    pub capacity: usize,

    /// Messages dropped to make room
    pub evicted: u64,

    /// When the oldest pending message was queued
    pub oldest: Option<chrono::DateTime<chrono::Utc>>,
}
