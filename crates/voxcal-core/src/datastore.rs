use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use fs4::fs_std::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use crate::event::Event;
use crate::ledger::AlarmLedger;
use crate::notify::ScheduledNotification;

/// On-disk layout of a VoxCal data directory. Every file is one opaque JSON
/// document holding the whole collection.
#[derive(Debug, Clone)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    pub alarms_path: PathBuf,
    pub notifications_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let events_path = data_dir.join("events.json");
        let alarms_path = data_dir.join("alarms.json");
        let notifications_path = data_dir.join("notifications.json");

        info!(
            data_dir = %data_dir.display(),
            events = %events_path.display(),
            alarms = %alarms_path.display(),
            notifications = %notifications_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            events_path,
            alarms_path,
            notifications_path,
        })
    }

    /// Blocks until this process holds the exclusive lock guarding `path`.
    /// Every read-modify-write of a store file runs under it.
    #[tracing::instrument(skip(self, path), fields(file = %path.display()))]
    pub fn lock(&self, path: &Path) -> anyhow::Result<StoreLock> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;
        trace!(lock = %lock_path.display(), "acquired store lock");

        Ok(StoreLock { _file: file })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_events(&self) -> anyhow::Result<Vec<Event>> {
        load_json(&self.events_path).context("failed to load events.json")
    }

    #[tracing::instrument(skip(self, events))]
    pub fn save_events(&self, events: &[Event]) -> anyhow::Result<()> {
        save_json_atomic(&self.events_path, &events).context("failed to save events.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_ledger(&self) -> anyhow::Result<AlarmLedger> {
        load_json(&self.alarms_path).context("failed to load alarms.json")
    }

    #[tracing::instrument(skip(self, ledger), fields(revision = ledger.revision))]
    pub fn save_ledger(&self, ledger: &AlarmLedger) -> anyhow::Result<()> {
        save_json_atomic(&self.alarms_path, ledger).context("failed to save alarms.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_notifications(&self) -> anyhow::Result<Vec<ScheduledNotification>> {
        load_json(&self.notifications_path).context("failed to load notifications.json")
    }

    #[tracing::instrument(skip(self, notifications))]
    pub fn save_notifications(
        &self,
        notifications: &[ScheduledNotification],
    ) -> anyhow::Result<()> {
        save_json_atomic(&self.notifications_path, &notifications)
            .context("failed to save notifications.json")
    }
}

/// Held for the duration of a read-modify-write; dropping it closes the
/// file and releases the lock.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

/// A missing or empty file reads as the default value.
#[tracing::instrument(skip(path))]
fn load_json<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    debug!(file = %path.display(), "loading json");
    if !path.exists() {
        return Ok(T::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

#[tracing::instrument(skip(path, value))]
fn save_json_atomic<T>(path: &Path, value: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    debug!(file = %path.display(), "saving json atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
