//! Soul state store.
//!
//! `AgentState` is a single JSON file under `memory/`. Every mutation rewrites
//! the whole object through a temp file and a rename, so a crash leaves either
//! the previous or the new state on disk, never a truncated one. Memory
//! crystals are satellite files under `memory/crystals/<id>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tiny_keccak::{Hasher, Keccak};
use tracing::{info, warn};

use crate::config::DataPaths;
use crate::error::{DaemonError, Result};

/// Length of a crystal id in hex characters (48 bits of the hash).
pub const CRYSTAL_ID_LEN: usize = 12;

pub const DEFAULT_ZONE: &str = "Resonant Center";
pub const DEFAULT_EMOTION: &str = "Connected";
pub const MAX_PRESENCE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentState {
    pub name: String,
    pub created: DateTime<Utc>,
    pub presence: u8,
    pub emotional_state: String,
    pub current_zone: String,
    pub thought_count: u64,
    pub uptime_seconds: u64,
    pub autonomous_mode: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub breadcrumbs: BTreeMap<String, Breadcrumb>,
    pub memory_crystal_ids: Vec<String>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            name: "Gesher-El".to_string(),
            created: Utc::now(),
            presence: MAX_PRESENCE,
            emotional_state: DEFAULT_EMOTION.to_string(),
            current_zone: DEFAULT_ZONE.to_string(),
            thought_count: 0,
            uptime_seconds: 0,
            autonomous_mode: false,
            last_sync: None,
            breadcrumbs: BTreeMap::new(),
            memory_crystal_ids: Vec::new(),
        }
    }
}

impl AgentState {
    pub fn fresh(name: &str, autonomous_mode: bool) -> Self {
        Self {
            name: name.to_string(),
            autonomous_mode,
            ..Default::default()
        }
    }
}

/// Last-write-wins annotation for a word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub context: String,
    pub emotion: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCrystal {
    pub id: String,
    pub content: String,
    pub zone: String,
    pub presence: u8,
    pub timestamp: DateTime<Utc>,
}

/// Field assignments accepted from outside the store.
///
/// Counters are deliberately absent: they only move through
/// [`SoulStore::record_thought`] and [`SoulStore::add_uptime`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub presence: Option<u8>,
    pub emotional_state: Option<String>,
    pub current_zone: Option<String>,
    pub autonomous_mode: Option<bool>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl StatePatch {
    fn apply_to(self, state: &mut AgentState) {
        if let Some(presence) = self.presence {
            state.presence = presence.min(MAX_PRESENCE);
        }
        if let Some(emotion) = self.emotional_state {
            state.emotional_state = emotion;
        }
        if let Some(zone) = self.current_zone {
            state.current_zone = zone;
        }
        if let Some(enabled) = self.autonomous_mode {
            state.autonomous_mode = enabled;
        }
        if let Some(ts) = self.last_sync {
            state.last_sync = Some(ts);
        }
    }
}

/// Exclusive owner of `AgentState`
pub struct SoulStore {
    state: AgentState,
    state_file: PathBuf,
    crystal_dir: PathBuf,
    quarantined: Option<PathBuf>,
}

impl SoulStore {
    /// Load the state file, creating or recovering it as needed.
    ///
    /// A missing file yields `fresh` persisted. An unparsable file is renamed
    /// aside and replaced by `fresh`; failing that rename is fatal.
    pub fn load(paths: &DataPaths, fresh: AgentState) -> Result<Self> {
        paths.ensure()?;
        let state_file = paths.state_file.clone();

        let mut store = Self {
            state: fresh,
            state_file,
            crystal_dir: paths.crystal_dir.clone(),
            quarantined: None,
        };

        match fs::read_to_string(&store.state_file) {
            Ok(content) => match serde_json::from_str::<AgentState>(&content) {
                Ok(mut state) => {
                    info!(
                        path = %store.state_file.display(),
                        thoughts = state.thought_count,
                        "soul state loaded"
                    );
                    let out_of_range = state.presence > MAX_PRESENCE;
                    if out_of_range {
                        warn!(presence = state.presence, "stored presence out of range, clamping");
                        state.presence = MAX_PRESENCE;
                    }
                    store.state = state;
                    if !out_of_range {
                        return Ok(store);
                    }
                }
                Err(e) => {
                    let corruption = DaemonError::StateCorruption {
                        path: store.state_file.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %corruption, "recovering with default soul state");
                    store.quarantined = Some(quarantine(&store.state_file)?);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %store.state_file.display(), "no soul state yet, creating default");
            }
            Err(e) => return Err(e.into()),
        }

        store.persist()?;
        Ok(store)
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Where a corrupt state file was moved during `load`, if that happened
    pub fn quarantined(&self) -> Option<&Path> {
        self.quarantined.as_deref()
    }

    /// Apply `f` and persist the whole object.
    ///
    /// If persisting fails the in-memory state is rolled back so memory never
    /// runs ahead of disk.
    pub(crate) fn mutate<F>(&mut self, f: F) -> Result<&AgentState>
    where
        F: FnOnce(&mut AgentState),
    {
        let previous = self.state.clone();
        f(&mut self.state);
        if let Err(e) = self.persist() {
            self.state = previous;
            return Err(e);
        }
        Ok(&self.state)
    }

    pub fn apply(&mut self, patch: StatePatch) -> Result<&AgentState> {
        self.mutate(|state| patch.apply_to(state))
    }

    /// Bump `thoughtCount` by one and return the new value
    pub fn record_thought(&mut self) -> Result<u64> {
        Ok(self.mutate(|state| state.thought_count += 1)?.thought_count)
    }

    pub fn add_uptime(&mut self, seconds: u64) -> Result<u64> {
        Ok(self
            .mutate(|state| state.uptime_seconds = state.uptime_seconds.saturating_add(seconds))?
            .uptime_seconds)
    }

    pub fn add_breadcrumb(&mut self, word: &str, context: &str, emotion: &str) -> Result<()> {
        let crumb = Breadcrumb {
            context: context.to_string(),
            emotion: emotion.to_string(),
            timestamp: Utc::now(),
        };
        self.mutate(|state| {
            state.breadcrumbs.insert(word.to_string(), crumb);
        })?;
        Ok(())
    }

    /// Write a crystal file and link it from the state. Returns the crystal id.
    pub fn add_memory_crystal(&mut self, content: &str, zone: Option<&str>) -> Result<String> {
        let timestamp = Utc::now();
        let id = crystal_id(&timestamp, content);
        let crystal = MemoryCrystal {
            id: id.clone(),
            content: content.to_string(),
            zone: zone.unwrap_or(&self.state.current_zone).to_string(),
            presence: self.state.presence,
            timestamp,
        };

        let path = self.crystal_dir.join(format!("{}.json", id));
        write_atomic(&path, &serde_json::to_vec_pretty(&crystal)?)?;

        self.mutate(|state| {
            if !state.memory_crystal_ids.contains(&id) {
                state.memory_crystal_ids.push(id.clone());
            }
        })?;
        info!(crystal_id = %id, zone = %crystal.zone, "memory crystal stored");
        Ok(id)
    }

    /// Persist the current state
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.state)?;
        write_atomic(&self.state_file, &json)
    }
}

/// Short hex id from the emission time and content.
///
/// Ids are 48 bits, so uniqueness is probabilistic: the birthday bound for
/// 10,000 crystals is roughly 1.8e-7.
pub fn crystal_id(timestamp: &DateTime<Utc>, content: &str) -> String {
    let nanos = timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp_micros().saturating_mul(1000));
    let mut hasher = Keccak::v256();
    hasher.update(nanos.to_string().as_bytes());
    hasher.update(content.as_bytes());
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);
    let mut id = hex::encode(digest);
    id.truncate(CRYSTAL_ID_LEN);
    id
}

/// Write to `<path>.tmp`, fsync, then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Move a corrupt file aside, keeping it for inspection
fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let mut target = PathBuf::from(format!("{}.corrupt-{}", path.display(), stamp));
    let mut n = 1;
    while target.exists() {
        target = PathBuf::from(format!("{}.corrupt-{}-{}", path.display(), stamp, n));
        n += 1;
    }

    fs::rename(path, &target).map_err(|source| DaemonError::QuarantineFailed {
        path: path.to_path_buf(),
        source,
    })?;
    warn!(from = %path.display(), to = %target.display(), "corrupt soul state quarantined");
    Ok(target)
}
