use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::datastore::DataStore;
use crate::event::{Event, EventDraft};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventChange {
    Added(Event),
    Updated(Event),
    Removed(String),
}

/// Backend-agnostic access to the event collection. Ids are assigned by the
/// implementation on `add` and never change afterwards.
pub trait EventRepository {
    fn list(&self) -> anyhow::Result<Vec<Event>>;

    fn get(&self, id: &str) -> anyhow::Result<Option<Event>> {
        Ok(self.list()?.into_iter().find(|e| e.id == id))
    }

    fn add(&self, draft: EventDraft) -> anyhow::Result<Event>;

    /// Replaces the stored record with the same id. Errors if there is none.
    fn update(&self, event: Event) -> anyhow::Result<Event>;

    fn remove(&self, id: &str) -> anyhow::Result<Option<Event>>;

    fn subscribe(&self) -> Receiver<EventChange>;
}

#[derive(Debug, Default)]
struct Subscribers {
    senders: Mutex<Vec<Sender<EventChange>>>,
}

impl Subscribers {
    fn subscribe(&self) -> Receiver<EventChange> {
        let (tx, rx) = mpsc::channel();
        self.senders.lock().push(tx);
        rx
    }

    fn publish(&self, change: EventChange) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(change.clone()).is_ok());
        debug!(subscribers = senders.len(), "published event change");
    }
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Events kept in `events.json`; every mutation rewrites the whole file.
#[derive(Debug)]
pub struct JsonEventRepository {
    store: DataStore,
    subscribers: Subscribers,
}

impl JsonEventRepository {
    pub fn new(store: DataStore) -> Self {
        Self {
            store,
            subscribers: Subscribers::default(),
        }
    }
}

impl EventRepository for JsonEventRepository {
    fn list(&self) -> anyhow::Result<Vec<Event>> {
        self.store.load_events()
    }

    #[instrument(skip(self, draft), fields(title = %draft.title))]
    fn add(&self, draft: EventDraft) -> anyhow::Result<Event> {
        let _lock = self.store.lock(&self.store.events_path)?;
        let mut events = self.store.load_events()?;
        let event = Event::from_draft(new_event_id(), draft);
        events.push(event.clone());
        events.sort_by_key(|e| e.start_date);
        self.store.save_events(&events)?;

        info!(id = %event.id, "event added");
        self.subscribers.publish(EventChange::Added(event.clone()));
        Ok(event)
    }

    #[instrument(skip(self, event), fields(id = %event.id))]
    fn update(&self, event: Event) -> anyhow::Result<Event> {
        let _lock = self.store.lock(&self.store.events_path)?;
        let mut events = self.store.load_events()?;
        let slot = events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| anyhow!("event not found: {}", event.id))?;
        *slot = event.clone();
        events.sort_by_key(|e| e.start_date);
        self.store.save_events(&events)?;

        info!("event updated");
        self.subscribers.publish(EventChange::Updated(event.clone()));
        Ok(event)
    }

    #[instrument(skip(self))]
    fn remove(&self, id: &str) -> anyhow::Result<Option<Event>> {
        let _lock = self.store.lock(&self.store.events_path)?;
        let mut events = self.store.load_events()?;
        let Some(idx) = events.iter().position(|e| e.id == id) else {
            debug!("nothing to remove");
            return Ok(None);
        };
        let removed = events.remove(idx);
        self.store.save_events(&events)?;

        info!("event removed");
        self.subscribers
            .publish(EventChange::Removed(removed.id.clone()));
        Ok(Some(removed))
    }

    fn subscribe(&self) -> Receiver<EventChange> {
        self.subscribers.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventRepository {
    events: Mutex<Vec<Event>>,
    subscribers: Subscribers,
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventRepository for MemoryEventRepository {
    fn list(&self) -> anyhow::Result<Vec<Event>> {
        Ok(self.events.lock().clone())
    }

    fn add(&self, draft: EventDraft) -> anyhow::Result<Event> {
        let event = Event::from_draft(new_event_id(), draft);
        {
            let mut events = self.events.lock();
            events.push(event.clone());
            events.sort_by_key(|e| e.start_date);
        }
        self.subscribers.publish(EventChange::Added(event.clone()));
        Ok(event)
    }

    fn update(&self, event: Event) -> anyhow::Result<Event> {
        {
            let mut events = self.events.lock();
            let slot = events
                .iter_mut()
                .find(|e| e.id == event.id)
                .ok_or_else(|| anyhow!("event not found: {}", event.id))?;
            *slot = event.clone();
            events.sort_by_key(|e| e.start_date);
        }
        self.subscribers.publish(EventChange::Updated(event.clone()));
        Ok(event)
    }

    fn remove(&self, id: &str) -> anyhow::Result<Option<Event>> {
        let removed = {
            let mut events = self.events.lock();
            events
                .iter()
                .position(|e| e.id == id)
                .map(|idx| events.remove(idx))
        };
        if let Some(event) = &removed {
            self.subscribers
                .publish(EventChange::Removed(event.id.clone()));
        }
        Ok(removed)
    }

    fn subscribe(&self) -> Receiver<EventChange> {
        self.subscribers.subscribe()
    }
}

/// Resolves a full id or a unique id prefix against `events`.
pub fn resolve_event_id(events: &[Event], token: &str) -> anyhow::Result<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(anyhow!("event id cannot be empty"));
    }
    if let Some(event) = events.iter().find(|e| e.id == token) {
        return Ok(event.id.clone());
    }

    let mut matches = events.iter().filter(|e| e.id.starts_with(token));
    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no event matches id {token}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("event id prefix {token} is ambiguous"));
    }
    Ok(first.id.clone())
}

/// Like [`resolve_event_id`], but a token that matches no event at all is
/// returned as-is. Alarms can outlive their event, so acknowledging needs
/// to reach ids that are no longer stored. Ambiguous prefixes still fail.
pub fn resolve_event_id_or_raw(events: &[Event], token: &str) -> anyhow::Result<String> {
    let trimmed = token.trim();
    if !trimmed.is_empty() && !events.iter().any(|e| e.id.starts_with(trimmed)) {
        return Ok(trimmed.to_string());
    }
    resolve_event_id(events, token)
}
