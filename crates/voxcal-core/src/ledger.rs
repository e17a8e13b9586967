use std::collections::BTreeMap;
use std::fmt;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::datastore::DataStore;
use crate::event::Alarm;

const MAX_UPDATE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlarmOutcome {
    Acknowledged,
    Cancelled,
    Expired,
}

/// Where an event's alarm chain currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    None,
    Scheduled { pending: usize },
    Acknowledged,
    Expired,
    Cancelled,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::None => write!(f, "none"),
            AlarmState::Scheduled { pending } => write!(f, "scheduled ({pending} pending)"),
            AlarmState::Acknowledged => write!(f, "acknowledged"),
            AlarmState::Expired => write!(f, "expired"),
            AlarmState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The persisted alarm collection. `revision` only ever grows and guards
/// every write.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmLedger {
    #[serde(default)]
    pub revision: u64,

    #[serde(default)]
    pub alarms: Vec<Alarm>,

    #[serde(default)]
    pub outcomes: BTreeMap<String, AlarmOutcome>,
}

impl AlarmLedger {
    pub fn for_event<'a>(&'a self, event_id: &'a str) -> impl Iterator<Item = &'a Alarm> + 'a {
        self.alarms.iter().filter(move |a| a.event_id == event_id)
    }

    pub fn pending_for(&self, event_id: &str, now: DateTime<Utc>) -> usize {
        self.for_event(event_id).filter(|a| a.time > now).count()
    }

    /// Drops every record for `event_id` and returns them.
    pub fn remove_event(&mut self, event_id: &str) -> Vec<Alarm> {
        let (removed, kept): (Vec<Alarm>, Vec<Alarm>) = std::mem::take(&mut self.alarms)
            .into_iter()
            .partition(|a| a.event_id == event_id);
        self.alarms = kept;
        removed
    }

    pub fn state_of(&self, event_id: &str, now: DateTime<Utc>) -> AlarmState {
        let mut total = 0usize;
        let mut pending = 0usize;
        for alarm in self.for_event(event_id) {
            total += 1;
            if alarm.time > now {
                pending += 1;
            }
        }

        if pending > 0 {
            return AlarmState::Scheduled { pending };
        }
        if total > 0 {
            return AlarmState::Expired;
        }

        match self.outcomes.get(event_id) {
            Some(AlarmOutcome::Acknowledged) => AlarmState::Acknowledged,
            Some(AlarmOutcome::Cancelled) => AlarmState::Cancelled,
            Some(AlarmOutcome::Expired) => AlarmState::Expired,
            None => AlarmState::None,
        }
    }

    /// Event ids whose every record has already fired.
    pub fn exhausted_events(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut by_event: BTreeMap<&str, bool> = BTreeMap::new();
        for alarm in &self.alarms {
            let exhausted = by_event.entry(alarm.event_id.as_str()).or_insert(true);
            if alarm.time > now {
                *exhausted = false;
            }
        }
        by_event
            .into_iter()
            .filter_map(|(id, exhausted)| exhausted.then(|| id.to_string()))
            .collect()
    }
}

/// Returned when a write raced with another writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionConflict {
    pub expected: u64,
    pub found: u64,
}

impl fmt::Display for RevisionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alarm ledger changed underneath us (expected revision {}, found {})",
            self.expected, self.found
        )
    }
}

impl std::error::Error for RevisionConflict {}

pub trait AlarmStore {
    fn load(&self) -> anyhow::Result<AlarmLedger>;

    /// Writes `next` only if the stored revision still equals
    /// `expected_revision`, returning the new revision. Fails with
    /// [`RevisionConflict`] otherwise.
    fn compare_and_swap(&self, expected_revision: u64, next: AlarmLedger) -> anyhow::Result<u64>;
}

/// Read-modify-write against `store`, re-reading and re-applying `apply`
/// when another writer got there first.
#[tracing::instrument(skip(store, apply))]
pub fn update_ledger<T>(
    store: &dyn AlarmStore,
    mut apply: impl FnMut(&mut AlarmLedger) -> T,
) -> anyhow::Result<T> {
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let mut ledger = store.load()?;
        let expected = ledger.revision;
        let result = apply(&mut ledger);

        match store.compare_and_swap(expected, ledger) {
            Ok(revision) => {
                debug!(revision, attempt, "alarm ledger updated");
                return Ok(result);
            }
            Err(err) => {
                if let Some(conflict) = err.downcast_ref::<RevisionConflict>() {
                    warn!(
                        expected = conflict.expected,
                        found = conflict.found,
                        attempt,
                        "alarm ledger conflict; retrying"
                    );
                    continue;
                }
                return Err(err);
            }
        }
    }

    Err(anyhow!(
        "gave up updating alarm ledger after {MAX_UPDATE_ATTEMPTS} conflicting writes"
    ))
}

/// Ledger kept in `alarms.json`.
#[derive(Debug, Clone)]
pub struct JsonAlarmStore {
    store: DataStore,
}

impl JsonAlarmStore {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

impl AlarmStore for JsonAlarmStore {
    fn load(&self) -> anyhow::Result<AlarmLedger> {
        self.store.load_ledger()
    }

    #[tracing::instrument(skip(self, next))]
    fn compare_and_swap(
        &self,
        expected_revision: u64,
        mut next: AlarmLedger,
    ) -> anyhow::Result<u64> {
        let _lock = self.store.lock(&self.store.alarms_path)?;
        let current = self.store.load_ledger()?;
        if current.revision != expected_revision {
            return Err(RevisionConflict {
                expected: expected_revision,
                found: current.revision,
            }
            .into());
        }
        next.revision = expected_revision + 1;
        self.store.save_ledger(&next)?;
        Ok(next.revision)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAlarmStore {
    ledger: Mutex<AlarmLedger>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlarmStore for MemoryAlarmStore {
    fn load(&self) -> anyhow::Result<AlarmLedger> {
        Ok(self.ledger.lock().clone())
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        mut next: AlarmLedger,
    ) -> anyhow::Result<u64> {
        let mut guard = self.ledger.lock();
        if guard.revision != expected_revision {
            return Err(RevisionConflict {
                expected: expected_revision,
                found: guard.revision,
            }
            .into());
        }
        next.revision = expected_revision + 1;
        *guard = next;
        Ok(guard.revision)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    use super::*;
    use crate::event::AlarmKind;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, minute, 0)
            .single()
            .expect("valid time")
    }

    fn alarm(id: &str, event_id: &str, time: DateTime<Utc>) -> Alarm {
        Alarm {
            id: id.to_string(),
            event_id: event_id.to_string(),
            time,
            active: true,
            label: "reminder".to_string(),
            kind: AlarmKind::Primary,
        }
    }

    #[test]
    fn state_follows_pending_records_then_outcome() {
        let mut ledger = AlarmLedger::default();
        assert_eq!(ledger.state_of("e", at(0)), AlarmState::None);

        ledger.alarms.push(alarm("1", "e", at(10)));
        ledger.alarms.push(alarm("2", "e", at(15)));
        ledger.alarms.push(alarm("3", "e", at(25)));
        assert_eq!(ledger.state_of("e", at(0)), AlarmState::Scheduled { pending: 3 });
        assert_eq!(ledger.state_of("e", at(12)), AlarmState::Scheduled { pending: 2 });
        assert_eq!(ledger.state_of("e", at(30)), AlarmState::Expired);

        ledger.remove_event("e");
        ledger
            .outcomes
            .insert("e".to_string(), AlarmOutcome::Acknowledged);
        assert_eq!(ledger.state_of("e", at(30)), AlarmState::Acknowledged);
    }

    #[test]
    fn exhausted_events_only_lists_fully_fired_chains() {
        let mut ledger = AlarmLedger::default();
        ledger.alarms.push(alarm("1", "old", at(0)));
        ledger.alarms.push(alarm("2", "old", at(5)));
        ledger.alarms.push(alarm("3", "new", at(5)));
        ledger.alarms.push(alarm("4", "new", at(20)));

        assert_eq!(ledger.exhausted_events(at(10)), vec!["old".to_string()]);
    }

    #[test]
    fn stale_revision_is_rejected() {
        let store = MemoryAlarmStore::new();
        let first = store.load().expect("load");
        let second = store.load().expect("load");

        store
            .compare_and_swap(first.revision, first.clone())
            .expect("first writer wins");
        let err = store
            .compare_and_swap(second.revision, second)
            .expect_err("second writer must conflict");
        let conflict = err
            .downcast_ref::<RevisionConflict>()
            .expect("typed conflict");
        assert_eq!(conflict.expected, 0);
        assert_eq!(conflict.found, 1);
    }

    #[test]
    fn json_store_detects_writer_from_another_handle() {
        let temp = tempdir().expect("tempdir");
        let ours = JsonAlarmStore::new(DataStore::open(temp.path()).expect("open"));
        let theirs = JsonAlarmStore::new(DataStore::open(temp.path()).expect("open"));

        let snapshot = ours.load().expect("load");
        update_ledger(&theirs, |ledger| {
            ledger.alarms.push(alarm("x", "e", at(0) + Duration::hours(1)));
        })
        .expect("their update");

        let err = ours
            .compare_and_swap(snapshot.revision, snapshot)
            .expect_err("stale write must fail");
        assert!(err.downcast_ref::<RevisionConflict>().is_some());

        let added = update_ledger(&ours, |ledger| {
            ledger.alarms.push(alarm("y", "e", at(0) + Duration::hours(2)));
            ledger.alarms.len()
        })
        .expect("retrying update");
        assert_eq!(added, 2);
        assert_eq!(ours.load().expect("load").revision, 2);
    }
}
