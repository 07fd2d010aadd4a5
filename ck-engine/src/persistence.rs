//! Durable snapshots of cooldowns, preferences and duration overrides.

use crate::error::PersistError;
use crate::preferences::PreferenceStore;
use crate::store::{CooldownEntry, CooldownStore};
use crate::types::{ActionName, ChannelRef, CooldownKey, OperatorId, OperatorPreference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCooldown {
    pub operator: OperatorId,
    pub action: ActionName,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub origin: Option<ChannelRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub cooldowns: Vec<PersistedCooldown>,
    #[serde(default)]
    pub preferences: BTreeMap<OperatorId, OperatorPreference>,
    #[serde(default)]
    pub duration_overrides: BTreeMap<ActionName, u64>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl StateSnapshot {
    pub fn capture(store: &CooldownStore, prefs: &PreferenceStore, now: DateTime<Utc>) -> Self {
        let cooldowns = store
            .snapshot(now)
            .into_iter()
            .map(|(key, entry)| PersistedCooldown {
                operator: key.operator,
                action: key.action,
                expires_at: entry.expires_at,
                origin: entry.origin,
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            cooldowns,
            preferences: prefs.operators_snapshot(),
            duration_overrides: prefs.overrides_snapshot(),
        }
    }

    /// Splits into live entries and the number of expired ones dropped.
    pub fn live_entries(&self, now: DateTime<Utc>) -> (Vec<(CooldownKey, CooldownEntry)>, usize) {
        let mut live = Vec::new();
        let mut dropped = 0;
        for cooldown in &self.cooldowns {
            if cooldown.expires_at <= now {
                dropped += 1;
                continue;
            }
            live.push((
                CooldownKey::new(cooldown.operator.clone(), cooldown.action.clone()),
                CooldownEntry {
                    expires_at: cooldown.expires_at,
                    origin: cooldown.origin.clone(),
                },
            ));
        }
        (live, dropped)
    }
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// `Ok(None)` means nothing has been saved yet.
    async fn load(&self) -> Result<Option<StateSnapshot>, PersistError>;
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistError>;
    fn describe(&self) -> String;
}

/// JSON document on local disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> Result<Option<StateSnapshot>, PersistError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistError> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, &data))
            .await
            .map_err(|e| PersistError::Io(format!("save task failed: {e}")))?
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PersistError::Io(e.error.to_string()))?;
    Ok(())
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: std::sync::Mutex<Option<StateSnapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            state: std::sync::Mutex::new(Some(snapshot)),
        }
    }

    pub fn current(&self) -> Option<StateSnapshot> {
        self.state.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<StateSnapshot>, PersistError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| PersistError::Io("lock poisoned".into()))?;
        Ok(guard.clone())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| PersistError::Io("lock poisoned".into()))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Write-through persistence. Saves are serialized and each one captures the
/// snapshot while holding the write lock, so the last write on disk is never
/// older than a write that finished before it.
pub struct Persistence {
    backend: Arc<dyn StateBackend>,
    write_lock: Mutex<()>,
}

impl Persistence {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Option<StateSnapshot>, PersistError> {
        self.backend.load().await
    }

    pub async fn save(
        &self,
        store: &CooldownStore,
        prefs: &PreferenceStore,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = StateSnapshot::capture(store, prefs, now);
        self.backend.save(&snapshot).await
    }

    /// Saves and logs failures; in-memory state stays authoritative.
    pub async fn save_logged(&self, store: &CooldownStore, prefs: &PreferenceStore, now: DateTime<Utc>) {
        if let Err(e) = self.save(store, prefs, now).await {
            tracing::error!(
                error = %e,
                backend = %self.backend.describe(),
                "failed to persist cooldown state"
            );
        }
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}
