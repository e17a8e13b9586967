mod support;

use std::fs;

use chrono::Duration;
use tempfile::tempdir;
use voxcal_core::coordinator::{Acknowledgement, AlarmCoordinator, CoordinatorOptions};
use voxcal_core::event::{AlarmKind, EventDraft, ReminderType};
use voxcal_core::ledger::{AlarmState, MemoryAlarmStore};
use voxcal_core::repository::{EventChange, MemoryEventRepository};

use support::{
    ManualClock, RecordingPlayer, RecordingScheduler, RecordingSpeech, base_time,
};

struct Harness {
    coordinator: AlarmCoordinator,
    scheduler: RecordingScheduler,
    speech: RecordingSpeech,
    player: RecordingPlayer,
    clock: ManualClock,
}

fn harness_with(scheduler: RecordingScheduler, options: CoordinatorOptions) -> Harness {
    let speech = RecordingSpeech::default();
    let player = RecordingPlayer::default();
    let clock = ManualClock::at(base_time());
    let coordinator = AlarmCoordinator::new(
        Box::new(MemoryEventRepository::new()),
        Box::new(MemoryAlarmStore::new()),
        Box::new(scheduler.clone()),
        Box::new(speech.clone()),
        Box::new(player.clone()),
    )
    .with_clock(Box::new(clock.clone()))
    .with_options(options);

    Harness {
        coordinator,
        scheduler,
        speech,
        player,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(RecordingScheduler::default(), CoordinatorOptions::default())
}

#[test]
fn future_event_gets_three_step_chain() {
    let h = harness();
    let start = base_time() + Duration::minutes(10);

    let event = h
        .coordinator
        .add_event(EventDraft::new("Standup", start))
        .expect("add event");

    let calls = h.scheduler.schedule_calls();
    let titles: Vec<&str> = calls.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["VoxCal: Standup", "MISSED: Standup", "URGENT: Standup"]
    );
    let fire_times: Vec<_> = calls.iter().map(|c| c.fire_at).collect();
    assert_eq!(
        fire_times,
        vec![
            start,
            start + Duration::minutes(5),
            start + Duration::minutes(15)
        ]
    );
    assert!(calls.iter().all(|c| c.data.event_id == event.id));
    assert!(calls.iter().all(|c| c.data.reminder_type == ReminderType::Standard));

    let ledger = h.coordinator.ledger().expect("ledger");
    assert_eq!(ledger.alarms.len(), 3);
    assert!(ledger.alarms.iter().all(|a| a.event_id == event.id && a.active));
    let times: Vec<_> = ledger.alarms.iter().map(|a| a.time).collect();
    assert_eq!(times, fire_times);
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Scheduled { pending: 3 }
    );
}

#[test]
fn past_or_current_event_gets_no_alarm() {
    let h = harness();

    for start in [base_time() - Duration::hours(1), base_time()] {
        let event = h
            .coordinator
            .add_event(EventDraft::new("Already started", start))
            .expect("add event");
        assert_eq!(
            h.coordinator.alarm_state(&event.id).expect("state"),
            AlarmState::None
        );
    }

    assert!(h.scheduler.schedule_calls().is_empty());
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
}

#[test]
fn event_without_alarm_flag_is_not_scheduled() {
    let h = harness();
    h.coordinator
        .add_event(EventDraft::new("Quiet", base_time() + Duration::hours(2)).with_alarm(false))
        .expect("add event");
    assert!(h.scheduler.schedule_calls().is_empty());
}

#[test]
fn missing_title_blocks_the_save() {
    let h = harness();
    let err = h
        .coordinator
        .add_event(EventDraft::new("", base_time() + Duration::hours(1)))
        .expect_err("blank title must fail");
    assert!(err.to_string().contains("title"));
    assert!(h.coordinator.events().list().expect("list").is_empty());
    assert!(h.scheduler.schedule_calls().is_empty());
}

#[test]
fn delete_cancels_chain_even_when_cancel_fails() {
    let h = harness_with(RecordingScheduler::failing_cancel(), CoordinatorOptions::default());
    let event = h
        .coordinator
        .add_event(EventDraft::new("Dentist", base_time() + Duration::hours(3)))
        .expect("add event");

    let removed = h.coordinator.delete_event(&event.id).expect("delete");
    assert_eq!(removed.map(|e| e.id), Some(event.id.clone()));

    assert_eq!(h.scheduler.cancel_calls().len(), 3);
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
    // The platform still holds them; we only lost track.
    assert_eq!(h.scheduler.live_ids().len(), 3);
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Cancelled
    );
    assert!(h.coordinator.events().get(&event.id).expect("get").is_none());
}

#[test]
fn cancel_only_touches_the_named_event() {
    let h = harness();
    let keep = h
        .coordinator
        .add_event(EventDraft::new("Keep", base_time() + Duration::hours(1)))
        .expect("add keep");
    let drop = h
        .coordinator
        .add_event(EventDraft::new("Drop", base_time() + Duration::hours(2)))
        .expect("add drop");

    let attempted = h.coordinator.cancel_event_alarms(&drop.id).expect("cancel");
    assert_eq!(attempted, 3);

    let ledger = h.coordinator.ledger().expect("ledger");
    assert_eq!(ledger.alarms.len(), 3);
    assert!(ledger.alarms.iter().all(|a| a.event_id == keep.id));
    assert_eq!(h.scheduler.live_ids().len(), 3);
}

#[test]
fn voice_acknowledgement_clears_chain_and_speaks() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(
            EventDraft::new("Pick up Sam", base_time() + Duration::minutes(30))
                .with_notes("School gate")
                .with_reminder_type(ReminderType::Voice),
        )
        .expect("add event");

    h.clock.advance(Duration::minutes(31));
    let outcome = h
        .coordinator
        .handle_alarm_trigger(&event.id, Some("default"))
        .expect("trigger");

    assert_eq!(
        outcome,
        Acknowledgement::Spoken("Reminder: Pick up Sam. School gate".to_string())
    );
    assert_eq!(h.speech.spoken(), vec!["Reminder: Pick up Sam. School gate"]);
    assert!(h.player.played().is_empty());
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
    assert!(h.scheduler.live_ids().is_empty());
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Acknowledged
    );
}

#[test]
fn standard_acknowledgement_plays_local_sound_only() {
    let temp = tempdir().expect("tempdir");
    let sound = temp.path().join("bell.wav");
    fs::write(&sound, b"RIFF").expect("write sound");

    let h = harness();
    let with_file = h
        .coordinator
        .add_event(
            EventDraft::new("Stretch", base_time() + Duration::minutes(5))
                .with_sound(sound.to_string_lossy()),
        )
        .expect("add event");
    let with_builtin = h
        .coordinator
        .add_event(EventDraft::new("Water", base_time() + Duration::minutes(5)).with_sound("Chime"))
        .expect("add event");

    assert_eq!(
        h.coordinator
            .handle_alarm_trigger(&with_file.id, None)
            .expect("trigger file"),
        Acknowledgement::PlayedSound(sound.clone())
    );
    assert_eq!(
        h.coordinator
            .handle_alarm_trigger(&with_builtin.id, None)
            .expect("trigger builtin"),
        Acknowledgement::Silent
    );

    assert_eq!(h.player.played(), vec![sound]);
    assert!(h.speech.spoken().is_empty());
    assert!(
        h.scheduler
            .schedule_calls()
            .iter()
            .filter(|c| c.data.event_id == with_builtin.id)
            .all(|c| c.sound == "Chime")
    );
}

#[test]
fn acknowledging_unknown_event_still_clears_its_alarms() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Ghost", base_time() + Duration::hours(1)))
        .expect("add event");
    h.coordinator
        .events()
        .remove(&event.id)
        .expect("remove behind the coordinator's back");

    let outcome = h
        .coordinator
        .handle_alarm_trigger(&event.id, None)
        .expect("trigger");
    assert_eq!(outcome, Acknowledgement::UnknownEvent);
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
}

#[test]
fn snooze_adds_one_notification_and_keeps_chain() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Call mum", base_time() + Duration::minutes(1)).with_notes("Birthday"))
        .expect("add event");

    h.clock.advance(Duration::minutes(2));
    let snoozed = h
        .coordinator
        .snooze_alarm(&event.id)
        .expect("snooze")
        .expect("snooze scheduled");

    assert_eq!(snoozed.kind, AlarmKind::Snooze);
    assert_eq!(snoozed.time, base_time() + Duration::minutes(12));

    let calls = h.scheduler.schedule_calls();
    assert_eq!(calls.len(), 4);
    let last = calls.last().expect("snooze call");
    assert_eq!(last.title, "Snoozed: Call mum");
    assert_eq!(last.body, "Birthday");
    assert!(!last.data.is_primary && !last.data.is_escalation);

    assert!(h.scheduler.cancel_calls().is_empty());
    assert_eq!(h.coordinator.ledger().expect("ledger").alarms.len(), 4);
}

#[test]
fn snooze_can_replace_the_chain() {
    let h = harness_with(
        RecordingScheduler::default(),
        CoordinatorOptions {
            snooze_replaces_chain: true,
        },
    );
    let event = h
        .coordinator
        .add_event(EventDraft::new("Meds", base_time() + Duration::minutes(1)))
        .expect("add event");

    h.clock.advance(Duration::minutes(2));
    h.coordinator.snooze_alarm(&event.id).expect("snooze");

    assert_eq!(h.scheduler.cancel_calls().len(), 3);
    let ledger = h.coordinator.ledger().expect("ledger");
    assert_eq!(ledger.alarms.len(), 1);
    assert_eq!(ledger.alarms[0].kind, AlarmKind::Snooze);
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Scheduled { pending: 1 }
    );
}

#[test]
fn snoozing_unknown_event_does_nothing() {
    let h = harness();
    assert!(h.coordinator.snooze_alarm("nope").expect("snooze").is_none());
    assert!(h.scheduler.schedule_calls().is_empty());
}

#[test]
fn update_rebuilds_the_chain_with_new_times() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Review", base_time() + Duration::hours(1)))
        .expect("add event");
    let old_ids: Vec<String> = h
        .coordinator
        .ledger()
        .expect("ledger")
        .alarms
        .into_iter()
        .map(|a| a.id)
        .collect();

    let moved = base_time() + Duration::hours(4);
    let mut draft = EventDraft::from(&event);
    draft.start_date = moved;
    draft.end_date = moved + Duration::hours(1);
    let updated = h.coordinator.update_event(&event.id, draft).expect("update");
    assert_eq!(updated.id, event.id);

    assert_eq!(h.scheduler.cancel_calls(), old_ids);
    let ledger = h.coordinator.ledger().expect("ledger");
    assert_eq!(ledger.alarms.len(), 3);
    assert_eq!(ledger.alarms[0].time, moved);
    assert!(ledger.alarms.iter().all(|a| !old_ids.contains(&a.id)));
}

#[test]
fn update_turning_alarm_off_leaves_nothing_scheduled() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Gym", base_time() + Duration::hours(1)))
        .expect("add event");

    let draft = EventDraft::from(&event).with_alarm(false);
    h.coordinator.update_event(&event.id, draft).expect("update");

    assert!(h.scheduler.live_ids().is_empty());
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Cancelled
    );
}

#[test]
fn updating_a_missing_event_fails() {
    let h = harness();
    let draft = EventDraft::new("Nowhere", base_time() + Duration::hours(1));
    assert!(h.coordinator.update_event("missing", draft).is_err());
    assert!(h.scheduler.schedule_calls().is_empty());
}

#[test]
fn partial_schedule_failure_keeps_the_rest() {
    let scheduler = RecordingScheduler::default();
    scheduler.0.lock().fail_schedule_call = Some(1);
    let h = harness_with(scheduler, CoordinatorOptions::default());

    let event = h
        .coordinator
        .add_event(EventDraft::new("Flaky", base_time() + Duration::hours(1)))
        .expect("add event despite a failed step");

    assert_eq!(h.scheduler.schedule_calls().len(), 3);
    let labels: Vec<String> = h
        .coordinator
        .ledger()
        .expect("ledger")
        .alarms
        .into_iter()
        .filter(|a| a.event_id == event.id)
        .map(|a| a.label)
        .collect();
    assert_eq!(labels, vec!["reminder".to_string(), "urgent".to_string()]);
}

#[test]
fn unacknowledged_chain_expires_and_is_swept() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Ignored", base_time() + Duration::minutes(1)))
        .expect("add event");

    h.clock.advance(Duration::minutes(10));
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Scheduled { pending: 1 }
    );
    let due = h.coordinator.deliver_due().expect("deliver");
    assert_eq!(due.len(), 2);

    h.clock.advance(Duration::minutes(10));
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Expired
    );

    let swept = h.coordinator.sweep_expired().expect("sweep");
    assert_eq!(swept, vec![event.id.clone()]);
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Expired
    );

    h.clock.advance(Duration::days(1));
    let mut draft = EventDraft::from(&event);
    draft.start_date = h.coordinator.now() + Duration::hours(1);
    draft.end_date = draft.start_date + Duration::hours(1);
    h.coordinator.update_event(&event.id, draft).expect("reschedule");
    assert_eq!(
        h.coordinator.alarm_state(&event.id).expect("state"),
        AlarmState::Scheduled { pending: 3 }
    );
}

#[test]
fn orphaned_alarms_are_pruned() {
    let h = harness();
    let event = h
        .coordinator
        .add_event(EventDraft::new("Orphan", base_time() + Duration::hours(1)))
        .expect("add event");
    h.coordinator.events().remove(&event.id).expect("remove");

    let pruned = h.coordinator.prune_orphans().expect("prune");
    assert_eq!(pruned, vec![event.id]);
    assert!(h.coordinator.ledger().expect("ledger").alarms.is_empty());
    assert!(h.scheduler.live_ids().is_empty());
}

#[test]
fn pruning_forgets_outcomes_of_deleted_events() {
    let h = harness();
    let kept = h
        .coordinator
        .add_event(EventDraft::new("Kept", base_time() + Duration::hours(1)))
        .expect("add kept");
    let deleted = h
        .coordinator
        .add_event(EventDraft::new("Deleted", base_time() + Duration::hours(2)))
        .expect("add deleted");
    h.coordinator
        .handle_alarm_trigger(&kept.id, None)
        .expect("ack kept");
    h.coordinator.delete_event(&deleted.id).expect("delete");
    h.coordinator
        .handle_alarm_trigger("no-such-event", None)
        .expect("ack unknown id");
    assert_eq!(h.coordinator.ledger().expect("ledger").outcomes.len(), 3);

    let pruned = h.coordinator.prune_orphans().expect("prune");
    assert!(pruned.is_empty());

    let ledger = h.coordinator.ledger().expect("ledger");
    assert_eq!(ledger.outcomes.keys().collect::<Vec<_>>(), vec![&kept.id]);
    assert_eq!(
        h.coordinator.alarm_state(&kept.id).expect("state"),
        AlarmState::Acknowledged
    );
    assert_eq!(
        h.coordinator.alarm_state(&deleted.id).expect("state"),
        AlarmState::None
    );
}

#[test]
fn subscribers_see_coordinator_mutations() {
    let h = harness();
    let changes = h.coordinator.events().subscribe();

    let event = h
        .coordinator
        .add_event(EventDraft::new("Watched", base_time() + Duration::hours(1)))
        .expect("add event");
    h.coordinator.delete_event(&event.id).expect("delete");

    let seen: Vec<EventChange> = changes.try_iter().collect();
    assert_eq!(
        seen,
        vec![EventChange::Added(event.clone()), EventChange::Removed(event.id)]
    );
}
