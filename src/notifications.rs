//! In-memory toast notifications. Nothing here survives a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const MAX_NOTIFICATIONS: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    items: VecDeque<Notification>,
}

#[derive(Default)]
pub struct NotificationCenter {
    inner: Mutex<Inner>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: NotificationKind, title: &str, message: &str) -> u64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        inner.items.push_back(Notification {
            id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        });

        while inner.items.len() > MAX_NOTIFICATIONS {
            inner.items.pop_front();
        }

        id
    }

    pub fn error(&self, title: &str, message: &str) -> u64 {
        self.add(NotificationKind::Error, title, message)
    }

    pub fn success(&self, title: &str, message: &str) -> u64 {
        self.add(NotificationKind::Success, title, message)
    }

    /// Returns false when the notification is gone.
    pub fn mark_read(&self, id: u64) -> bool {
        let mut inner = self.lock();
        match inner.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        for notification in self.lock().items.iter_mut() {
            notification.read = true;
        }
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.lock().items.iter().rev().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().items.iter().filter(|n| !n.read).count()
    }

    // A panic while holding the lock cannot leave the list half-written.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
