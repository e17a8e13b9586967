#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use voxcal_core::announce::{SoundPlayer, SpeechAnnouncer};
use voxcal_core::coordinator::Clock;
use voxcal_core::notify::{NotificationRequest, NotificationScheduler, ScheduledNotification};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
        .single()
        .expect("valid base time")
}

#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

#[derive(Default)]
pub struct SchedulerState {
    pub next_id: u64,
    pub scheduled: Vec<ScheduledNotification>,
    pub schedule_calls: Vec<NotificationRequest>,
    pub cancel_calls: Vec<String>,
    pub fail_cancel: bool,
    /// Zero-based index of the schedule call that should fail.
    pub fail_schedule_call: Option<usize>,
}

/// In-memory scheduler that records every call it receives.
#[derive(Clone, Default)]
pub struct RecordingScheduler(pub Arc<Mutex<SchedulerState>>);

impl RecordingScheduler {
    pub fn failing_cancel() -> Self {
        let scheduler = Self::default();
        scheduler.0.lock().fail_cancel = true;
        scheduler
    }

    pub fn schedule_calls(&self) -> Vec<NotificationRequest> {
        self.0.lock().schedule_calls.clone()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.0.lock().cancel_calls.clone()
    }

    pub fn live_ids(&self) -> Vec<String> {
        self.0.lock().scheduled.iter().map(|n| n.id.clone()).collect()
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(&self, request: &NotificationRequest) -> anyhow::Result<String> {
        let mut state = self.0.lock();
        let call = state.schedule_calls.len();
        state.schedule_calls.push(request.clone());
        if state.fail_schedule_call == Some(call) {
            return Err(anyhow!("scheduler rejected call {call}"));
        }
        state.next_id += 1;
        let id = format!("notif-{}", state.next_id);
        state.scheduled.push(ScheduledNotification {
            id: id.clone(),
            request: request.clone(),
        });
        Ok(id)
    }

    fn cancel(&self, id: &str) -> anyhow::Result<()> {
        let mut state = self.0.lock();
        state.cancel_calls.push(id.to_string());
        if state.fail_cancel {
            return Err(anyhow!("platform refused to cancel {id}"));
        }
        state.scheduled.retain(|n| n.id != id);
        Ok(())
    }

    fn scheduled(&self) -> anyhow::Result<Vec<ScheduledNotification>> {
        Ok(self.0.lock().scheduled.clone())
    }

    fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledNotification>> {
        let mut state = self.0.lock();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|n| n.request.fire_at <= now);
        state.scheduled = waiting;
        Ok(due)
    }
}

#[derive(Clone, Default)]
pub struct RecordingSpeech(pub Arc<Mutex<Vec<String>>>);

impl RecordingSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl SpeechAnnouncer for RecordingSpeech {
    fn speak(&self, text: &str) -> anyhow::Result<()> {
        self.0.lock().push(text.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPlayer(pub Arc<Mutex<Vec<PathBuf>>>);

impl RecordingPlayer {
    pub fn played(&self) -> Vec<PathBuf> {
        self.0.lock().clone()
    }
}

impl SoundPlayer for RecordingPlayer {
    fn play(&self, path: &Path) -> anyhow::Result<()> {
        self.0.lock().push(path.to_path_buf());
        Ok(())
    }
}
