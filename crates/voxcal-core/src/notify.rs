use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::datastore::DataStore;
use crate::event::ReminderType;

/// Payload carried by a notification back to whoever acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub event_id: String,

    #[serde(rename = "type")]
    pub reminder_type: ReminderType,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_primary: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_escalation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
    pub sound: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    pub id: String,
    pub request: NotificationRequest,
}

/// Platform facility that delivers local notifications at a given instant.
pub trait NotificationScheduler {
    /// Returns an opaque id usable with [`NotificationScheduler::cancel`].
    fn schedule(&self, request: &NotificationRequest) -> anyhow::Result<String>;

    /// Cancelling an id that is no longer pending is not an error.
    fn cancel(&self, id: &str) -> anyhow::Result<()>;

    fn scheduled(&self) -> anyhow::Result<Vec<ScheduledNotification>>;

    /// Removes and returns every notification whose fire time is at or
    /// before `now`.
    fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledNotification>>;
}

/// Keeps pending notifications in `notifications.json` until they are due.
#[derive(Debug, Clone)]
pub struct SpoolScheduler {
    store: DataStore,
}

impl SpoolScheduler {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

impl NotificationScheduler for SpoolScheduler {
    #[instrument(skip(self, request), fields(title = %request.title, fire_at = %request.fire_at))]
    fn schedule(&self, request: &NotificationRequest) -> anyhow::Result<String> {
        let _lock = self.store.lock(&self.store.notifications_path)?;
        let mut spool = self.store.load_notifications()?;
        let id = Uuid::new_v4().to_string();
        spool.push(ScheduledNotification {
            id: id.clone(),
            request: request.clone(),
        });
        spool.sort_by_key(|n| n.request.fire_at);
        self.store.save_notifications(&spool)?;

        debug!(%id, "notification spooled");
        Ok(id)
    }

    #[instrument(skip(self))]
    fn cancel(&self, id: &str) -> anyhow::Result<()> {
        let _lock = self.store.lock(&self.store.notifications_path)?;
        let mut spool = self.store.load_notifications()?;
        let before = spool.len();
        spool.retain(|n| n.id != id);
        if spool.len() == before {
            debug!("notification already delivered or cancelled");
            return Ok(());
        }
        self.store.save_notifications(&spool)?;
        debug!("notification cancelled");
        Ok(())
    }

    fn scheduled(&self) -> anyhow::Result<Vec<ScheduledNotification>> {
        self.store.load_notifications()
    }

    #[instrument(skip(self))]
    fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledNotification>> {
        let _lock = self.store.lock(&self.store.notifications_path)?;
        let spool = self.store.load_notifications()?;
        let (due, waiting): (Vec<_>, Vec<_>) =
            spool.into_iter().partition(|n| n.request.fire_at <= now);
        if !due.is_empty() {
            self.store.save_notifications(&waiting)?;
            info!(
                delivered = due.len(),
                waiting = waiting.len(),
                "delivered due notifications"
            );
        }
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    use super::*;

    fn request(title: &str, fire_at: DateTime<Utc>) -> NotificationRequest {
        NotificationRequest {
            title: title.to_string(),
            body: String::new(),
            data: NotificationData {
                event_id: "ev".to_string(),
                reminder_type: ReminderType::Standard,
                is_primary: true,
                is_escalation: false,
            },
            sound: "default".to_string(),
            badge: None,
            fire_at,
        }
    }

    #[test]
    fn spool_delivers_only_due_notifications() {
        let temp = tempdir().expect("tempdir");
        let scheduler = SpoolScheduler::new(DataStore::open(temp.path()).expect("open"));
        let now = Utc
            .with_ymd_and_hms(2026, 7, 1, 12, 0, 0)
            .single()
            .expect("valid now");

        scheduler
            .schedule(&request("late", now + Duration::minutes(5)))
            .expect("schedule late");
        scheduler
            .schedule(&request("early", now - Duration::minutes(1)))
            .expect("schedule early");

        let due = scheduler.take_due(now).expect("take due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].request.title, "early");

        let left = scheduler.scheduled().expect("scheduled");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].request.title, "late");
    }

    #[test]
    fn cancelling_a_delivered_notification_is_a_no_op() {
        let temp = tempdir().expect("tempdir");
        let scheduler = SpoolScheduler::new(DataStore::open(temp.path()).expect("open"));
        let now = Utc::now();

        let fired = scheduler
            .schedule(&request("fired", now - Duration::minutes(1)))
            .expect("schedule fired");
        let pending = scheduler
            .schedule(&request("pending", now + Duration::hours(1)))
            .expect("schedule pending");
        assert_eq!(scheduler.take_due(now).expect("take due").len(), 1);

        scheduler.cancel(&fired).expect("cancel delivered id");
        scheduler.cancel(&fired).expect("cancel twice");

        let left = scheduler.scheduled().expect("scheduled");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, pending);
    }

    #[test]
    fn payload_keeps_the_wire_field_names() {
        let data = NotificationData {
            event_id: "ev".to_string(),
            reminder_type: ReminderType::Voice,
            is_primary: false,
            is_escalation: true,
        };
        let json = serde_json::to_value(&data).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({ "eventId": "ev", "type": "voice", "isEscalation": true })
        );
    }
}
