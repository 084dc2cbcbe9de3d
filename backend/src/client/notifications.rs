use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Local, per-process notification list. Nothing here is sent to the server.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    notifications: Vec<Notification>,
    last_id: u64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids are millisecond timestamps, bumped when two land in the same millisecond.
    pub fn add(
        &mut self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> u64 {
        let now = Utc::now();
        let id = (now.timestamp_millis().max(0) as u64).max(self.last_id + 1);
        self.last_id = id;
        self.notifications.push(Notification {
            id,
            kind,
            title: title.into(),
            message: message.into(),
            read: false,
            created_at: now,
        });
        id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|notification| notification.id != id);
        self.notifications.len() != before
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
    }

    pub fn mark_as_read(&mut self, id: u64) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }
}
