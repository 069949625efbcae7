use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::{fs, io, path::PathBuf};

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::Serialize;

use super::profile::ConnectionProfile;
use crate::core::errors::CoreError;

const PROFILES_FILE: &str = "profiles.json";

/// Outcome of [`ConnectionProfileStore::import_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Distinct profiles written.
    pub imported: usize,
    /// Records rejected as invalid or undecodable.
    pub skipped: usize,
    /// Valid records replaced by a later record with the same id in the batch.
    pub duplicates: usize,
}

impl ImportSummary {
    pub fn any_imported(&self) -> bool {
        self.imported > 0
    }
}

/// Registry of connection profiles, keyed by id.
///
/// Profiles live in memory; a store opened on a directory mirrors every
/// change to `profiles.json` there. A change is only kept in memory once
/// the file write succeeded, so memory and disk never disagree.
#[derive(Debug)]
pub struct ConnectionProfileStore {
    file: Option<PathBuf>,
    profiles: RwLock<BTreeMap<String, ConnectionProfile>>,
}

impl ConnectionProfileStore {
    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            profiles: RwLock::new(BTreeMap::new()),
        }
    }

    /// `~/.config/kvdesk/profiles.json` on Linux, `%APPDATA%\kvdesk\...` on Windows, etc.
    pub fn open_default() -> Result<Self, CoreError> {
        let proj = ProjectDirs::from("", "", "kvdesk").ok_or_else(|| {
            CoreError::Storage("Unable to locate config dir".into())
        })?;
        Self::open(proj.config_dir())
    }

    /// Open (or create) the store in `dir`. Malformed or invalid entries
    /// in an existing file are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let file = dir.join(PROFILES_FILE);

        let mut profiles = BTreeMap::new();
        match fs::read_to_string(&file) {
            Ok(text) => {
                let raw: Vec<serde_json::Value> = serde_json::from_str(&text)?;
                for value in raw {
                    match serde_json::from_value::<ConnectionProfile>(value) {
                        Ok(p) if p.is_valid() => {
                            profiles.insert(p.id.clone(), p);
                        }
                        Ok(p) => warn!("Skipping invalid profile '{}' in {:?}", p.id, file),
                        Err(e) => warn!("Could not read profile in {:?}: {e}", file),
                    }
                }
                info!("Loaded {} profiles from {:?}", profiles.len(), file);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            file: Some(file),
            profiles: RwLock::new(profiles),
        })
    }

    fn persist(&self, profiles: &BTreeMap<String, ConnectionProfile>) -> Result<(), CoreError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let tmp = file.with_extension("json.tmp");
        let records: Vec<&ConnectionProfile> = profiles.values().collect();
        fs::write(&tmp, serde_json::to_vec_pretty(&records)?)?;
        fs::rename(&tmp, file)?;
        Ok(())
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, ConnectionProfile>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut guard = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    /// Every stored profile, ordered by id.
    pub fn list(&self) -> Vec<ConnectionProfile> {
        let guard = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        guard.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<ConnectionProfile> {
        let guard = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        guard.get(id).cloned()
    }

    /// Add a new profile; `Conflict` if the id is taken.
    pub fn add(&self, profile: ConnectionProfile) -> Result<(), CoreError> {
        profile.validate()?;
        self.commit(|map| {
            if map.contains_key(&profile.id) {
                return Err(CoreError::Conflict(format!(
                    "profile '{}' already exists",
                    profile.id
                )));
            }
            info!("Adding profile '{}' ({}:{})", profile.id, profile.host, profile.port);
            map.insert(profile.id.clone(), profile);
            Ok(())
        })
    }

    /// Replace an existing profile; `NotFound` if the id is unknown.
    pub fn update(&self, profile: ConnectionProfile) -> Result<(), CoreError> {
        profile.validate()?;
        self.commit(|map| match map.get_mut(&profile.id) {
            Some(slot) => {
                *slot = profile;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("profile '{}'", profile.id))),
        })
    }

    /// Delete a profile (`Ok(true)` if removed, `Ok(false)` if it didn't exist).
    pub fn remove(&self, id: &str) -> Result<bool, CoreError> {
        self.commit(|map| Ok(map.remove(id).is_some()))
    }

    pub fn export_all(&self) -> Vec<ConnectionProfile> {
        self.list()
    }

    /// Import a batch of profiles.
    ///
    /// Invalid candidates are skipped; all valid ones are applied in a single
    /// commit, replacing stored profiles with the same id. Within one batch a
    /// later record wins over an earlier one with the same id.
    pub fn import_all(
        &self,
        candidates: Vec<ConnectionProfile>,
    ) -> Result<ImportSummary, CoreError> {
        let mut summary = ImportSummary::default();
        let mut accepted: HashMap<String, ConnectionProfile> = HashMap::new();
        for candidate in candidates {
            match candidate.validate() {
                Ok(()) => {
                    if let Some(earlier) = accepted.insert(candidate.id.clone(), candidate) {
                        debug!("Import superseded an earlier '{}' record", earlier.id);
                        summary.duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!("Import skipped: {e}");
                    summary.skipped += 1;
                }
            }
        }
        summary.imported = accepted.len();
        if accepted.is_empty() {
            return Ok(summary);
        }
        self.commit(|map| {
            map.extend(accepted);
            Ok(())
        })?;
        info!(
            "Imported {} profiles ({} skipped, {} duplicates)",
            summary.imported, summary.skipped, summary.duplicates
        );
        Ok(summary)
    }

    /// The whole store as a JSON array of profile records.
    pub fn export_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(&self.export_all())?)
    }

    /// Import a JSON array; records that fail to decode count as skipped.
    pub fn import_json(&self, json: &str) -> Result<ImportSummary, CoreError> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let total = raw.len();
        let decoded: Vec<ConnectionProfile> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        let undecodable = total - decoded.len();
        let mut summary = self.import_all(decoded)?;
        summary.skipped += undecodable;
        Ok(summary)
    }
}
