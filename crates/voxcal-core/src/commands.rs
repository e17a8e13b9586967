use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::cli::{AddArgs, Command, EditArgs};
use crate::config::Config;
use crate::coordinator::{Acknowledgement, AlarmCoordinator};
use crate::datetime::parse_date_expr;
use crate::event::{EventDraft, ReminderType};
use crate::render::Renderer;
use crate::repository::{resolve_event_id, resolve_event_id_or_raw};

#[instrument(skip(coordinator, cfg, renderer, command))]
pub fn dispatch(
    coordinator: &AlarmCoordinator,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(coordinator, args),
        Command::Edit(args) => cmd_edit(coordinator, args),
        Command::Delete { id } => cmd_delete(coordinator, &id),
        Command::List { all } => cmd_list(coordinator, renderer, all),
        Command::Info { id } => cmd_info(coordinator, renderer, &id),
        Command::Alarms => cmd_alarms(coordinator, renderer),
        Command::Ack { event_id, action } => cmd_ack(coordinator, &event_id, action.as_deref()),
        Command::Snooze { event_id } => cmd_snooze(coordinator, &event_id),
        Command::Due => cmd_due(coordinator, renderer),
        Command::Sweep => cmd_sweep(coordinator),
        Command::Show => cmd_show(cfg),
    }
}

fn resolve_id(coordinator: &AlarmCoordinator, token: &str) -> anyhow::Result<String> {
    let events = coordinator.events().list()?;
    resolve_event_id(&events, token)
}

fn parse_when(expr: &str, now: DateTime<Utc>, what: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_date_expr(expr, now).with_context(|| format!("invalid --{what} value"))
}

#[instrument(skip(coordinator, args))]
fn cmd_add(coordinator: &AlarmCoordinator, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");
    let now = coordinator.now();

    let start = parse_when(&args.start, now, "start")?;
    let mut draft = EventDraft::new(args.title.join(" "), start).with_alarm(!args.no_alarm);
    if let Some(end) = &args.end {
        draft = draft.with_end(parse_when(end, now, "end")?);
    }
    if let Some(notes) = args.notes {
        draft = draft.with_notes(notes);
    }
    if args.voice {
        draft = draft.with_reminder_type(ReminderType::Voice);
    }
    if let Some(sound) = args.sound
        && !args.no_alarm
    {
        draft = draft.with_sound(sound);
    }
    draft.is_all_day = args.all_day;

    let event = coordinator.add_event(draft)?;
    let state = coordinator.alarm_state(&event.id)?;
    println!("Created event {} ({}).", event.id, state);
    Ok(())
}

#[instrument(skip(coordinator, args))]
fn cmd_edit(coordinator: &AlarmCoordinator, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");
    let now = coordinator.now();
    let id = resolve_id(coordinator, &args.id)?;
    let existing = coordinator
        .events()
        .get(&id)?
        .with_context(|| format!("event not found: {id}"))?;

    let mut draft = EventDraft::from(&existing);
    if let Some(title) = args.title {
        draft.title = title;
    }
    if let Some(start) = &args.start {
        let start = parse_when(start, now, "start")?;
        let duration = draft.end_date - draft.start_date;
        draft.start_date = start;
        draft.end_date = start + duration;
    }
    if let Some(end) = &args.end {
        draft.end_date = parse_when(end, now, "end")?;
    }
    if let Some(notes) = args.notes {
        draft.notes = Some(notes);
    }
    if args.voice {
        draft.reminder_type = ReminderType::Voice;
    } else if args.standard {
        draft.reminder_type = ReminderType::Standard;
    }
    if let Some(sound) = args.sound {
        draft.sound = Some(sound);
    }
    if args.alarm {
        draft = draft.with_alarm(true);
    } else if args.no_alarm {
        draft = draft.with_alarm(false);
    }

    let event = coordinator.update_event(&id, draft)?;
    let state = coordinator.alarm_state(&event.id)?;
    println!("Updated event {} ({}).", event.id, state);
    Ok(())
}

#[instrument(skip(coordinator))]
fn cmd_delete(coordinator: &AlarmCoordinator, token: &str) -> anyhow::Result<()> {
    info!("command delete");
    let id = resolve_id(coordinator, token)?;
    match coordinator.delete_event(&id)? {
        Some(event) => println!("Deleted event {} \"{}\".", event.id, event.title),
        None => println!("No event {id}; cleaned up its alarms."),
    }
    Ok(())
}

#[instrument(skip(coordinator, renderer))]
fn cmd_list(coordinator: &AlarmCoordinator, renderer: &Renderer, all: bool) -> anyhow::Result<()> {
    info!("command list");
    let now = coordinator.now();
    let ledger = coordinator.ledger()?;

    let rows: Vec<_> = coordinator
        .events()
        .list()?
        .into_iter()
        .filter(|event| all || event.end_date >= now)
        .map(|event| {
            let state = ledger.state_of(&event.id, now);
            (event, state)
        })
        .collect();

    renderer.print_event_table(&rows, now)
}

#[instrument(skip(coordinator, renderer))]
fn cmd_info(coordinator: &AlarmCoordinator, renderer: &Renderer, token: &str) -> anyhow::Result<()> {
    info!("command info");
    let id = resolve_id(coordinator, token)?;
    let event = coordinator
        .events()
        .get(&id)?
        .with_context(|| format!("event not found: {id}"))?;
    let ledger = coordinator.ledger()?;
    let alarms: Vec<_> = ledger.for_event(&id).cloned().collect();

    renderer.print_event_info(&event, ledger.state_of(&id, coordinator.now()), &alarms)
}

#[instrument(skip(coordinator, renderer))]
fn cmd_alarms(coordinator: &AlarmCoordinator, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command alarms");
    let mut alarms = coordinator.ledger()?.alarms;
    alarms.sort_by_key(|a| a.time);
    let events = coordinator.events().list()?;
    renderer.print_alarm_table(&alarms, &events)
}

#[instrument(skip(coordinator))]
fn cmd_ack(
    coordinator: &AlarmCoordinator,
    token: &str,
    action: Option<&str>,
) -> anyhow::Result<()> {
    info!("command ack");
    let events = coordinator.events().list()?;
    let id = resolve_event_id_or_raw(&events, token)?;

    match coordinator.handle_alarm_trigger(&id, action)? {
        Acknowledgement::Spoken(text) => println!("Acknowledged; announced: {text}"),
        Acknowledgement::PlayedSound(path) => {
            println!("Acknowledged; played {}.", path.display())
        }
        Acknowledgement::Silent => println!("Acknowledged."),
        Acknowledgement::UnknownEvent => println!("Acknowledged alarms of unknown event {id}."),
    }
    Ok(())
}

#[instrument(skip(coordinator))]
fn cmd_snooze(coordinator: &AlarmCoordinator, token: &str) -> anyhow::Result<()> {
    info!("command snooze");
    let id = resolve_id(coordinator, token)?;
    match coordinator.snooze_alarm(&id)? {
        Some(alarm) => println!("Snoozed until {}.", alarm.time.to_rfc3339()),
        None => println!("Could not snooze {id}."),
    }
    Ok(())
}

#[instrument(skip(coordinator, renderer))]
fn cmd_due(coordinator: &AlarmCoordinator, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command due");
    let delivered = coordinator.deliver_due()?;
    renderer.print_notifications(&delivered)
}

#[instrument(skip(coordinator))]
fn cmd_sweep(coordinator: &AlarmCoordinator) -> anyhow::Result<()> {
    info!("command sweep");
    let expired = coordinator.sweep_expired()?;
    let orphans = coordinator.prune_orphans()?;
    println!(
        "Swept {} expired chain(s) and {} orphaned chain(s).",
        expired.len(),
        orphans.len()
    );
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    match cfg.source() {
        Some(path) => println!("# from {}", path.display()),
        None => println!("# defaults only"),
    }
    for (key, value) in cfg.iter() {
        println!("{key}={value}");
    }
    Ok(())
}
