//! Durable subscription and alert-watch records.
//!
//! The whole store is one JSON document. Every mutation runs against a copy of
//! the in-memory state, is written to disk (temp file + rename) and only then
//! replaces the live state, so a failed write changes nothing.

mod rows;

pub use rows::StoreCorruption;

use crate::types::alert::{AlertWatch, Severity};
use crate::types::subscription::{
    Cadence, DeliverySubscription, SubscriptionDraft, SubscriptionId,
};
use crate::types::validation::{ValidationError, normalize_key};
use rows::{AlertWatchRow, DefaultLocationRow, FORMAT_VERSION, StoreFile, SubscriptionRow};

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("subscription not found")]
    NotFoundOrNotOwner,

    #[error("store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("unsupported store format version {0}")]
    UnsupportedVersion(u32),

    #[error("next fire {next_fire_at} is not after last fire {last_fired_at}")]
    ScheduleNotAdvancing {
        next_fire_at: OffsetDateTime,
        last_fired_at: OffsetDateTime,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

fn ensure_advances(
    last_fired_at: Option<OffsetDateTime>,
    next_fire_at: OffsetDateTime,
) -> Result<(), StoreError> {
    match last_fired_at {
        Some(last_fired_at) if next_fire_at <= last_fired_at => {
            Err(StoreError::ScheduleNotAdvancing {
                next_fire_at,
                last_fired_at,
            })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Subscriptions,
    AlertWatches,
}

/// A row that failed to decode. The raw JSON is written back unchanged.
#[derive(Debug, Clone)]
struct QuarantinedRow {
    section: Section,
    raw: Value,
    corruption: StoreCorruption,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, DeliverySubscription>,
    alert_watches: BTreeMap<(String, String), AlertWatch>,
    default_locations: BTreeMap<String, String>,
    quarantined: Vec<QuarantinedRow>,
}

impl StoreState {
    fn from_file(file: StoreFile) -> Result<Self, StoreError> {
        if file.version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }

        let mut state = Self {
            next_id: file.next_id.max(1),
            ..Self::default()
        };

        for raw in file.subscriptions {
            if let Some(id) = raw.get("id").and_then(Value::as_u64) {
                state.next_id = state.next_id.max(id.saturating_add(1));
            }
            match SubscriptionRow::from_value(&raw) {
                Ok(subscription) => {
                    state.subscriptions.insert(subscription.id, subscription);
                }
                Err(corruption) => state.quarantine(Section::Subscriptions, raw, corruption),
            }
        }

        for raw in file.alert_watches {
            match AlertWatchRow::from_value(&raw) {
                Ok(watch) => {
                    let key = (watch.owner.clone(), watch.location.clone());
                    state.alert_watches.insert(key, watch);
                }
                Err(corruption) => state.quarantine(Section::AlertWatches, raw, corruption),
            }
        }

        state.default_locations = file
            .default_locations
            .into_iter()
            .map(|row| (row.owner, row.location))
            .collect();

        Ok(state)
    }

    fn quarantine(&mut self, section: Section, raw: Value, corruption: StoreCorruption) {
        tracing::error!(%corruption, "quarantined store row");
        self.quarantined.push(QuarantinedRow {
            section,
            raw,
            corruption,
        });
    }

    fn to_file(&self) -> Result<StoreFile, StoreError> {
        let mut subscriptions = Vec::with_capacity(self.subscriptions.len());
        for subscription in self.subscriptions.values() {
            subscriptions.push(serde_json::to_value(SubscriptionRow::from(subscription))?);
        }
        let mut alert_watches = Vec::with_capacity(self.alert_watches.len());
        for watch in self.alert_watches.values() {
            alert_watches.push(serde_json::to_value(AlertWatchRow::from(watch))?);
        }
        for row in &self.quarantined {
            match row.section {
                Section::Subscriptions => subscriptions.push(row.raw.clone()),
                Section::AlertWatches => alert_watches.push(row.raw.clone()),
            }
        }

        Ok(StoreFile {
            version: FORMAT_VERSION,
            next_id: self.next_id,
            subscriptions,
            alert_watches,
            default_locations: self
                .default_locations
                .iter()
                .map(|(owner, location)| DefaultLocationRow {
                    owner: owner.clone(),
                    location: location.clone(),
                })
                .collect(),
        })
    }

    fn owned_mut(
        &mut self,
        owner: &str,
        id: SubscriptionId,
    ) -> Result<&mut DeliverySubscription, StoreError> {
        self.subscriptions
            .get_mut(&id)
            .filter(|subscription| subscription.owner == owner)
            .ok_or(StoreError::NotFoundOrNotOwner)
    }
}

pub struct SubscriptionStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl SubscriptionStore {
    /// Loads the store from `path`, or starts empty when the file does not
    /// exist yet. Rows that fail to decode are quarantined, not dropped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => StoreState::from_file(serde_json::from_str(&contents)?)?,
            Err(err) if err.kind() == ErrorKind::NotFound => StoreState {
                next_id: 1,
                ..StoreState::default()
            },
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::info!(
            path = %path.display(),
            subscriptions = state.subscriptions.len(),
            alert_watches = state.alert_watches.len(),
            quarantined = state.quarantined.len(),
            "opened subscription store"
        );

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Store without a backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState {
                next_id: 1,
                ..StoreState::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R, StoreError> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Applies `f` to a copy of the state. When `f` reports a change, the copy
    /// is persisted and swapped in.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<(R, bool), StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let (result, changed) = f(&mut next)?;
        if changed {
            self.persist(&next)?;
            *guard = next;
        }
        Ok(result)
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&state.to_file()?)?;
        atomic_write(path, &contents).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "failed to write store");
            StoreError::Io {
                path: path.clone(),
                source,
            }
        })
    }

    pub fn create(&self, draft: SubscriptionDraft) -> Result<DeliverySubscription, StoreError> {
        let owner = normalize_key(&draft.owner, "owner")?;
        let location = normalize_key(&draft.location, "location")?;
        let cadence = Cadence::from_parts(draft.cadence, draft.weekday)?;
        let outlook_days = cadence.outlook_days(draft.outlook_days)?;

        self.mutate(|state| {
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            let subscription = DeliverySubscription {
                id,
                owner,
                location,
                cadence,
                local_time: draft.local_time,
                outlook_days,
                active: true,
                created_at: draft.created_at,
                last_fired_at: None,
                next_fire_at: draft.next_fire_at,
            };
            state.subscriptions.insert(id, subscription.clone());
            Ok((subscription, true))
        })
    }

    pub fn get(&self, id: SubscriptionId) -> Result<Option<DeliverySubscription>, StoreError> {
        self.read(|state| state.subscriptions.get(&id).cloned())
    }

    /// The owner's subscriptions, soonest first.
    pub fn list_by_owner(&self, owner: &str) -> Result<Vec<DeliverySubscription>, StoreError> {
        let mut subscriptions = self.read(|state| {
            state
                .subscriptions
                .values()
                .filter(|subscription| subscription.owner == owner)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        subscriptions.sort_by_key(|subscription| (subscription.next_fire_at, subscription.id));
        Ok(subscriptions)
    }

    /// Active subscriptions whose next fire is at or before `now`, in
    /// `(next_fire_at, id)` order.
    pub fn list_due(&self, now: OffsetDateTime) -> Result<Vec<DeliverySubscription>, StoreError> {
        let mut due = self.read(|state| {
            state
                .subscriptions
                .values()
                .filter(|subscription| subscription.active && subscription.next_fire_at <= now)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        due.sort_by_key(|subscription| (subscription.next_fire_at, subscription.id));
        Ok(due)
    }

    /// Records a fire. Returns `false` without touching anything when the
    /// record was paused, removed, or no longer carries `expected_next_fire_at`.
    pub fn mark_fired(
        &self,
        id: SubscriptionId,
        expected_next_fire_at: OffsetDateTime,
        fired_at: OffsetDateTime,
        next_fire_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        self.mutate(|state| {
            let Some(subscription) = state.subscriptions.get_mut(&id) else {
                return Ok((false, false));
            };
            if !subscription.active || subscription.next_fire_at != expected_next_fire_at {
                return Ok((false, false));
            }
            ensure_advances(Some(fired_at), next_fire_at)?;
            subscription.last_fired_at = Some(fired_at);
            subscription.next_fire_at = next_fire_at;
            Ok((true, true))
        })
    }

    /// Pauses or resumes. Resuming stores `next_fire_at` so a long pause does
    /// not produce a burst of overdue fires. It must lie after `last_fired_at`.
    pub fn set_active(
        &self,
        owner: &str,
        id: SubscriptionId,
        active: bool,
        next_fire_at: OffsetDateTime,
    ) -> Result<DeliverySubscription, StoreError> {
        self.mutate(|state| {
            let subscription = state.owned_mut(owner, id)?;
            if subscription.active == active {
                return Ok((subscription.clone(), false));
            }
            if active {
                ensure_advances(subscription.last_fired_at, next_fire_at)?;
                subscription.next_fire_at = next_fire_at;
            }
            subscription.active = active;
            Ok((subscription.clone(), true))
        })
    }

    pub fn delete(&self, owner: &str, id: SubscriptionId) -> Result<(), StoreError> {
        self.mutate(|state| {
            state.owned_mut(owner, id)?;
            state.subscriptions.remove(&id);
            Ok(((), true))
        })
    }

    /// Removes every subscription and alert watch of `owner`. Returns how many
    /// records were removed.
    pub fn delete_all_for_owner(&self, owner: &str) -> Result<usize, StoreError> {
        self.mutate(|state| {
            let before = state.subscriptions.len() + state.alert_watches.len();
            state
                .subscriptions
                .retain(|_, subscription| subscription.owner != owner);
            state.alert_watches.retain(|(watcher, _), _| watcher != owner);
            let removed = before - state.subscriptions.len() - state.alert_watches.len();
            Ok((removed, removed > 0))
        })
    }

    /// Creates or updates a watch. Already seen alert ids are kept.
    pub fn upsert_alert_watch(
        &self,
        owner: &str,
        location: &str,
        min_severity: Severity,
        enabled: bool,
    ) -> Result<AlertWatch, StoreError> {
        let owner = normalize_key(owner, "owner")?;
        let location = normalize_key(location, "location")?;
        self.mutate(|state| {
            let watch = state
                .alert_watches
                .entry((owner.clone(), location.clone()))
                .or_insert_with(|| AlertWatch {
                    owner,
                    location,
                    min_severity,
                    enabled,
                    seen_alert_ids: BTreeSet::new(),
                });
            watch.min_severity = min_severity;
            watch.enabled = enabled;
            Ok((watch.clone(), true))
        })
    }

    pub fn get_alert_watch(
        &self,
        owner: &str,
        location: &str,
    ) -> Result<Option<AlertWatch>, StoreError> {
        self.read(|state| {
            state
                .alert_watches
                .get(&(owner.to_string(), location.to_string()))
                .cloned()
        })
    }

    pub fn list_alert_watches(&self, owner: &str) -> Result<Vec<AlertWatch>, StoreError> {
        self.read(|state| {
            state
                .alert_watches
                .values()
                .filter(|watch| watch.owner == owner)
                .cloned()
                .collect()
        })
    }

    pub fn list_enabled_alert_watches(&self) -> Result<Vec<AlertWatch>, StoreError> {
        self.read(|state| {
            state
                .alert_watches
                .values()
                .filter(|watch| watch.enabled)
                .cloned()
                .collect()
        })
    }

    pub fn delete_alert_watch(&self, owner: &str, location: &str) -> Result<bool, StoreError> {
        self.mutate(|state| {
            let removed = state
                .alert_watches
                .remove(&(owner.to_string(), location.to_string()))
                .is_some();
            Ok((removed, removed))
        })
    }

    /// Marks `alert_id` as delivered to the watch. Returns whether it was new;
    /// a repeat call writes nothing.
    pub fn record_seen(
        &self,
        owner: &str,
        location: &str,
        alert_id: &str,
    ) -> Result<bool, StoreError> {
        self.mutate(|state| {
            let Some(watch) = state
                .alert_watches
                .get_mut(&(owner.to_string(), location.to_string()))
            else {
                return Ok((false, false));
            };
            let added = watch.seen_alert_ids.insert(alert_id.to_string());
            Ok((added, added))
        })
    }

    /// Forgets seen ids that are no longer active upstream for `location`.
    /// Returns how many ids were dropped across all watches of that location.
    pub fn prune_seen(&self, location: &str, active_ids: &BTreeSet<String>) -> Result<usize, StoreError> {
        self.mutate(|state| {
            let mut pruned = 0;
            for watch in state
                .alert_watches
                .values_mut()
                .filter(|watch| watch.location == location)
            {
                let before = watch.seen_alert_ids.len();
                watch.seen_alert_ids.retain(|id| active_ids.contains(id));
                pruned += before - watch.seen_alert_ids.len();
            }
            Ok((pruned, pruned > 0))
        })
    }

    pub fn set_default_location(&self, owner: &str, location: &str) -> Result<String, StoreError> {
        let owner = normalize_key(owner, "owner")?;
        let location = normalize_key(location, "location")?;
        self.mutate(|state| {
            let changed = state.default_locations.get(&owner) != Some(&location);
            state.default_locations.insert(owner, location.clone());
            Ok((location, changed))
        })
    }

    pub fn default_location(&self, owner: &str) -> Result<Option<String>, StoreError> {
        self.read(|state| state.default_locations.get(owner).cloned())
    }

    pub fn quarantined(&self) -> Result<Vec<StoreCorruption>, StoreError> {
        self.read(|state| {
            state
                .quarantined
                .iter()
                .map(|row| row.corruption.clone())
                .collect()
        })
    }
}

fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("store.json");
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for attempt in 0..10u32 {
        let temp_path = parent.join(format!(".{file_name}.tmp-{pid}-{nanos}-{attempt}"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(mut file) => {
                let written = file
                    .write_all(contents.as_bytes())
                    .and_then(|()| file.sync_all())
                    .and_then(|()| std::fs::rename(&temp_path, path));
                if written.is_err() {
                    let _ = std::fs::remove_file(&temp_path);
                }
                return written;
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to allocate temp file",
    ))
}
