use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Marker stored in `alarm_id` when the event wants an alarm chain.
pub const ALARM_PENDING: &str = "pending";

pub const BUILTIN_SOUNDS: [&str; 4] = ["Default", "Chime", "Beep", "Cosmic"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReminderType {
    Voice,
    #[default]
    Standard,
}

impl ReminderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderType::Voice => "voice",
            ReminderType::Standard => "standard",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,

    pub title: String,

    pub start_date: DateTime<Utc>,

    pub end_date: DateTime<Utc>,

    #[serde(default)]
    pub is_all_day: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_id: Option<String>,

    #[serde(default)]
    pub reminder_type: ReminderType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl Event {
    pub fn from_draft(id: String, draft: EventDraft) -> Self {
        Self {
            id,
            title: draft.title,
            start_date: draft.start_date,
            end_date: draft.end_date,
            is_all_day: draft.is_all_day,
            notes: draft.notes,
            alarm_id: draft.alarm_id,
            reminder_type: draft.reminder_type,
            sound: draft.sound,
        }
    }

    /// Only truthiness of `alarm_id` matters; the value itself is a marker.
    pub fn wants_alarm(&self) -> bool {
        self.alarm_id
            .as_deref()
            .is_some_and(|marker| !marker.is_empty())
    }

    /// The sound as a file on disk, if it refers to one rather than a built-in name.
    pub fn local_sound_path(&self) -> Option<PathBuf> {
        let sound = self.sound.as_deref()?.trim();
        if let Some(rest) = sound.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        let path = PathBuf::from(sound);
        if path.is_absolute() {
            Some(path)
        } else {
            None
        }
    }

    pub fn notification_sound(&self) -> String {
        self.sound
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "default".to_string())
    }
}

/// User input for an event before a store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_all_day: bool,
    pub notes: Option<String>,
    pub alarm_id: Option<String>,
    pub reminder_type: ReminderType,
    pub sound: Option<String>,
}

impl EventDraft {
    /// New draft with the alarm enabled and a one hour duration.
    pub fn new(title: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            start_date,
            end_date: start_date + Duration::hours(1),
            is_all_day: false,
            notes: None,
            alarm_id: Some(ALARM_PENDING.to_string()),
            reminder_type: ReminderType::Standard,
            sound: None,
        }
    }

    pub fn with_alarm(mut self, enabled: bool) -> Self {
        self.alarm_id = enabled.then(|| ALARM_PENDING.to_string());
        if !enabled {
            self.sound = None;
        }
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_reminder_type(mut self, reminder_type: ReminderType) -> Self {
        self.reminder_type = reminder_type;
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_end(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = end_date;
        self
    }

    /// Rejects a blank title and pulls an end before the start back to start + 1h.
    pub fn validate(mut self) -> anyhow::Result<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(anyhow!("please enter a title"));
        }
        if self.end_date < self.start_date {
            self.end_date = self.start_date + Duration::hours(1);
        }
        if self.notes.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.notes = None;
        }
        Ok(self)
    }
}

impl From<&Event> for EventDraft {
    fn from(event: &Event) -> Self {
        Self {
            title: event.title.clone(),
            start_date: event.start_date,
            end_date: event.end_date,
            is_all_day: event.is_all_day,
            notes: event.notes.clone(),
            alarm_id: event.alarm_id.clone(),
            reminder_type: event.reminder_type,
            sound: event.sound.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlarmKind {
    Primary,
    Escalation,
    Snooze,
}

/// One scheduled notification derived from an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: String,
    pub event_id: String,
    pub time: DateTime<Utc>,
    pub active: bool,
    pub label: String,
    #[serde(default = "default_alarm_kind")]
    pub kind: AlarmKind,
}

fn default_alarm_kind() -> AlarmKind {
    AlarmKind::Primary
}
