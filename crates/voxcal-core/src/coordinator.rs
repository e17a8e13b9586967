//! Alarm escalation for calendar events.
//!
//! An alarm-enabled event gets a chain of three notifications: the primary
//! one at the start time and two escalations five and fifteen minutes later.
//! The first acknowledgement of any of them retires the rest of the chain.

use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::announce::{SoundPlayer, SpeechAnnouncer};
use crate::event::{Alarm, AlarmKind, Event, EventDraft, ReminderType};
use crate::ledger::{AlarmLedger, AlarmOutcome, AlarmState, AlarmStore, update_ledger};
use crate::notify::{
    NotificationData, NotificationRequest, NotificationScheduler, ScheduledNotification,
};
use crate::repository::EventRepository;

pub const SNOOZE_MINUTES: i64 = 10;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct ChainStep {
    offset_minutes: i64,
    title_prefix: &'static str,
    kind: AlarmKind,
    label: &'static str,
    badge: Option<u32>,
}

const ESCALATION_CHAIN: [ChainStep; 3] = [
    ChainStep {
        offset_minutes: 0,
        title_prefix: "VoxCal: ",
        kind: AlarmKind::Primary,
        label: "reminder",
        badge: None,
    },
    ChainStep {
        offset_minutes: 5,
        title_prefix: "MISSED: ",
        kind: AlarmKind::Escalation,
        label: "missed",
        badge: Some(1),
    },
    ChainStep {
        offset_minutes: 15,
        title_prefix: "URGENT: ",
        kind: AlarmKind::Escalation,
        label: "urgent",
        badge: Some(2),
    },
];

impl ChainStep {
    fn body(&self, event: &Event) -> String {
        match self.label {
            "reminder" => event
                .notes
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Event Starting Now".to_string()),
            "missed" => "You missed your event! Tap to view details.".to_string(),
            _ => "Final Reminder! Please check your schedule.".to_string(),
        }
    }

    fn request(&self, event: &Event) -> NotificationRequest {
        NotificationRequest {
            title: format!("{}{}", self.title_prefix, event.title),
            body: self.body(event),
            data: NotificationData {
                event_id: event.id.clone(),
                reminder_type: event.reminder_type,
                is_primary: self.kind == AlarmKind::Primary,
                is_escalation: self.kind == AlarmKind::Escalation,
            },
            sound: event.notification_sound(),
            badge: self.badge,
            fire_at: event.start_date + Duration::minutes(self.offset_minutes),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Cancel the remaining escalations before scheduling a snooze.
    pub snooze_replaces_chain: bool,
}

/// What acknowledging a notification ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Spoken(String),
    PlayedSound(PathBuf),
    Silent,
    UnknownEvent,
}

pub struct AlarmCoordinator {
    events: Box<dyn EventRepository>,
    alarms: Box<dyn AlarmStore>,
    scheduler: Box<dyn NotificationScheduler>,
    speech: Box<dyn SpeechAnnouncer>,
    sounds: Box<dyn SoundPlayer>,
    clock: Box<dyn Clock>,
    options: CoordinatorOptions,
}

impl AlarmCoordinator {
    pub fn new(
        events: Box<dyn EventRepository>,
        alarms: Box<dyn AlarmStore>,
        scheduler: Box<dyn NotificationScheduler>,
        speech: Box<dyn SpeechAnnouncer>,
        sounds: Box<dyn SoundPlayer>,
    ) -> Self {
        Self {
            events,
            alarms,
            scheduler,
            speech,
            sounds,
            clock: Box::new(SystemClock),
            options: CoordinatorOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn events(&self) -> &dyn EventRepository {
        self.events.as_ref()
    }

    pub fn scheduler(&self) -> &dyn NotificationScheduler {
        self.scheduler.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ledger(&self) -> anyhow::Result<AlarmLedger> {
        self.alarms.load()
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub fn add_event(&self, draft: EventDraft) -> anyhow::Result<Event> {
        let draft = draft.validate()?;
        let event = self.events.add(draft)?;
        if event.wants_alarm() {
            self.schedule_event_alarm(&event)?;
        }
        Ok(event)
    }

    /// Replaces the event's fields (its id is kept) and rebuilds its chain.
    #[instrument(skip(self, draft))]
    pub fn update_event(&self, id: &str, draft: EventDraft) -> anyhow::Result<Event> {
        let draft = draft.validate()?;
        if self.events.get(id)?.is_none() {
            return Err(anyhow!("event not found: {id}"));
        }
        let event = self
            .events
            .update(Event::from_draft(id.to_string(), draft))?;

        self.cancel_event_alarms(id)?;
        if event.wants_alarm() {
            self.schedule_event_alarm(&event)?;
        }
        Ok(event)
    }

    /// Alarms are cleaned up even when the event itself is already gone.
    #[instrument(skip(self))]
    pub fn delete_event(&self, id: &str) -> anyhow::Result<Option<Event>> {
        let removed = self.events.remove(id)?;
        if removed.is_none() {
            warn!("event not found; cleaning up alarms only");
        }
        self.cancel_event_alarms(id)?;
        Ok(removed)
    }

    /// Schedules the three-step chain for `event`. Events that have already
    /// started get nothing. A step the scheduler rejects is logged and
    /// skipped; steps already scheduled stay scheduled.
    #[instrument(skip(self, event), fields(event_id = %event.id, start = %event.start_date))]
    pub fn schedule_event_alarm(&self, event: &Event) -> anyhow::Result<Vec<Alarm>> {
        let now = self.clock.now();
        if event.start_date <= now {
            debug!(%now, "event is not in the future; no alarm");
            return Ok(Vec::new());
        }

        let mut scheduled = Vec::with_capacity(ESCALATION_CHAIN.len());
        for step in &ESCALATION_CHAIN {
            let request = step.request(event);
            match self.scheduler.schedule(&request) {
                Ok(id) => scheduled.push(Alarm {
                    id,
                    event_id: event.id.clone(),
                    time: request.fire_at,
                    active: true,
                    label: step.label.to_string(),
                    kind: step.kind,
                }),
                Err(err) => warn!(
                    label = step.label,
                    fire_at = %request.fire_at,
                    error = %format!("{err:#}"),
                    "failed to schedule notification"
                ),
            }
        }

        if scheduled.is_empty() {
            warn!("no notification of the chain could be scheduled");
            return Ok(scheduled);
        }

        let recorded = update_ledger(self.alarms.as_ref(), |ledger| {
            ledger.outcomes.remove(&event.id);
            ledger.alarms.extend(scheduled.iter().cloned());
        });
        if let Err(err) = recorded {
            warn!(
                error = %format!("{err:#}"),
                "could not record alarm chain; withdrawing its notifications"
            );
            self.withdraw(&scheduled);
            return Ok(Vec::new());
        }

        info!(count = scheduled.len(), "alarm chain scheduled");
        Ok(scheduled)
    }

    /// Best-effort cancel of every alarm for `event_id`; the records are
    /// dropped whether or not the scheduler accepted the cancellation.
    /// Returns how many cancellations were attempted.
    #[instrument(skip(self))]
    pub fn cancel_event_alarms(&self, event_id: &str) -> anyhow::Result<usize> {
        Ok(self.retire_chain(event_id, AlarmOutcome::Cancelled))
    }

    /// Called when the user acknowledges any notification of `event_id`'s
    /// chain. `action_id` is recorded in the logs only.
    #[instrument(skip(self))]
    pub fn handle_alarm_trigger(
        &self,
        event_id: &str,
        action_id: Option<&str>,
    ) -> anyhow::Result<Acknowledgement> {
        info!(action = action_id.unwrap_or("default"), "alarm acknowledged");
        self.retire_chain(event_id, AlarmOutcome::Acknowledged);

        let Some(event) = self.events.get(event_id)? else {
            warn!("acknowledged alarm for unknown event");
            return Ok(Acknowledgement::UnknownEvent);
        };

        if event.reminder_type == ReminderType::Voice {
            let text = spoken_reminder(&event);
            if let Err(err) = self.speech.speak(&text) {
                warn!(error = %format!("{err:#}"), "speech announcement failed");
            }
            return Ok(Acknowledgement::Spoken(text));
        }

        if let Some(path) = event.local_sound_path() {
            if let Err(err) = self.sounds.play(&path) {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "sound playback failed"
                );
            }
            return Ok(Acknowledgement::PlayedSound(path));
        }

        Ok(Acknowledgement::Silent)
    }

    /// One extra notification ten minutes out. Unless configured otherwise
    /// the escalation chain keeps running alongside it.
    #[instrument(skip(self))]
    pub fn snooze_alarm(&self, event_id: &str) -> anyhow::Result<Option<Alarm>> {
        let Some(event) = self.events.get(event_id)? else {
            warn!("cannot snooze unknown event");
            return Ok(None);
        };

        let now = self.clock.now();
        if self.options.snooze_replaces_chain {
            self.retire_chain(event_id, AlarmOutcome::Cancelled);
        } else {
            let pending = match self.alarms.load() {
                Ok(ledger) => ledger.pending_for(event_id, now),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not read alarm ledger");
                    0
                }
            };
            if pending > 0 {
                warn!(
                    pending,
                    "snoozing while escalations are still pending; notifications may overlap"
                );
            }
        }

        let request = NotificationRequest {
            title: format!("Snoozed: {}", event.title),
            body: event.notes.clone().unwrap_or_default(),
            data: NotificationData {
                event_id: event.id.clone(),
                reminder_type: event.reminder_type,
                is_primary: false,
                is_escalation: false,
            },
            sound: event.notification_sound(),
            badge: None,
            fire_at: now + Duration::minutes(SNOOZE_MINUTES),
        };

        let id = match self.scheduler.schedule(&request) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to schedule snooze");
                return Ok(None);
            }
        };

        let alarm = Alarm {
            id,
            event_id: event.id.clone(),
            time: request.fire_at,
            active: true,
            label: "snooze".to_string(),
            kind: AlarmKind::Snooze,
        };
        let recorded = update_ledger(self.alarms.as_ref(), |ledger| {
            ledger.outcomes.remove(&event.id);
            ledger.alarms.push(alarm.clone());
        });
        if let Err(err) = recorded {
            warn!(
                error = %format!("{err:#}"),
                "could not record snooze; withdrawing its notification"
            );
            self.withdraw(std::slice::from_ref(&alarm));
            return Ok(None);
        }

        info!(fire_at = %alarm.time, "alarm snoozed");
        Ok(Some(alarm))
    }

    pub fn alarm_state(&self, event_id: &str) -> anyhow::Result<AlarmState> {
        Ok(self.alarms.load()?.state_of(event_id, self.clock.now()))
    }

    /// Drops chains whose every notification has fired without an
    /// acknowledgement. Returns the affected event ids.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self) -> anyhow::Result<Vec<String>> {
        let now = self.clock.now();
        let expired = update_ledger(self.alarms.as_ref(), |ledger| {
            let exhausted = ledger.exhausted_events(now);
            for event_id in &exhausted {
                ledger.remove_event(event_id);
                ledger
                    .outcomes
                    .insert(event_id.clone(), AlarmOutcome::Expired);
            }
            exhausted
        })?;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired alarm chains swept");
        }
        Ok(expired)
    }

    /// Cancels alarms that point at events which no longer exist and forgets
    /// the outcomes recorded for them.
    #[instrument(skip(self))]
    pub fn prune_orphans(&self) -> anyhow::Result<Vec<String>> {
        let events = self.events.list()?;
        let ledger = self.alarms.load()?;

        let mut orphans: Vec<String> = ledger
            .alarms
            .iter()
            .filter(|a| !events.iter().any(|e| e.id == a.event_id))
            .map(|a| a.event_id.clone())
            .collect();
        orphans.sort();
        orphans.dedup();

        for event_id in &orphans {
            self.cancel_event_alarms(event_id)?;
        }

        let forgotten = update_ledger(self.alarms.as_ref(), |ledger| {
            let before = ledger.outcomes.len();
            ledger
                .outcomes
                .retain(|id, _| events.iter().any(|e| &e.id == id));
            before - ledger.outcomes.len()
        })?;

        if !orphans.is_empty() || forgotten > 0 {
            info!(
                count = orphans.len(),
                forgotten,
                "orphaned alarms pruned"
            );
        }
        Ok(orphans)
    }

    /// Hands over every notification whose time has come.
    pub fn deliver_due(&self) -> anyhow::Result<Vec<ScheduledNotification>> {
        self.scheduler.take_due(self.clock.now())
    }

    /// Ledger failures are logged and leave the records in place; the
    /// scheduler side is still cancelled.
    fn retire_chain(&self, event_id: &str, outcome: AlarmOutcome) -> usize {
        let targets: Vec<Alarm> = match self.alarms.load() {
            Ok(ledger) => ledger.for_event(event_id).cloned().collect(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not read alarm ledger");
                Vec::new()
            }
        };

        self.withdraw(&targets);

        let record_outcome = outcome == AlarmOutcome::Acknowledged || !targets.is_empty();
        let removed = update_ledger(self.alarms.as_ref(), |ledger| {
            let removed = ledger.remove_event(event_id).len();
            if record_outcome {
                ledger.outcomes.insert(event_id.to_string(), outcome);
            }
            removed
        });

        match removed {
            Ok(removed) => debug!(
                attempted = targets.len(),
                removed,
                ?outcome,
                "alarm chain retired"
            ),
            Err(err) => warn!(
                error = %format!("{err:#}"),
                ?outcome,
                "could not update alarm ledger"
            ),
        }
        targets.len()
    }

    fn withdraw(&self, alarms: &[Alarm]) {
        for alarm in alarms {
            if let Err(err) = self.scheduler.cancel(&alarm.id) {
                warn!(
                    alarm_id = %alarm.id,
                    error = %format!("{err:#}"),
                    "failed to cancel alarm"
                );
            }
        }
    }
}

fn spoken_reminder(event: &Event) -> String {
    format!(
        "Reminder: {}. {}",
        event.title,
        event.notes.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn event() -> Event {
        let start = Utc
            .with_ymd_and_hms(2026, 9, 1, 9, 0, 0)
            .single()
            .expect("valid start");
        Event::from_draft("ev".to_string(), EventDraft::new("Standup", start))
    }

    #[test]
    fn chain_offsets_and_copy() {
        let event = event();
        let requests: Vec<NotificationRequest> =
            ESCALATION_CHAIN.iter().map(|s| s.request(&event)).collect();

        let offsets: Vec<i64> = requests
            .iter()
            .map(|r| (r.fire_at - event.start_date).num_minutes())
            .collect();
        assert_eq!(offsets, vec![0, 5, 15]);

        assert_eq!(requests[0].title, "VoxCal: Standup");
        assert_eq!(requests[0].body, "Event Starting Now");
        assert!(requests[0].data.is_primary);
        assert_eq!(requests[1].title, "MISSED: Standup");
        assert_eq!(requests[1].badge, Some(1));
        assert!(requests[1].data.is_escalation);
        assert_eq!(requests[2].title, "URGENT: Standup");
        assert_eq!(requests[2].badge, Some(2));
        assert!(requests.iter().all(|r| r.sound == "default"));
    }

    #[test]
    fn primary_body_prefers_notes() {
        let mut event = event();
        event.notes = Some("Bring the slides".to_string());
        assert_eq!(ESCALATION_CHAIN[0].body(&event), "Bring the slides");
    }

    #[test]
    fn spoken_text_template() {
        let mut event = event();
        assert_eq!(spoken_reminder(&event), "Reminder: Standup. ");
        event.notes = Some("Room 4".to_string());
        assert_eq!(spoken_reminder(&event), "Reminder: Standup. Room 4");
    }
}
