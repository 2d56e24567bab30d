//! Named, persisted parameter templates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::fs::{read_json, write_json_atomic};
use crate::engine::JobParameters;
use crate::{Error, Result};

/// A named parameter template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: JobParameters,
    /// Built-in presets cannot be deleted or renamed.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Preset {
    pub fn new(name: impl Into<String>, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            parameters,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Serialize)]
struct PresetFileRef<'a> {
    presets: Vec<&'a Preset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used: Option<&'a str>,
}

#[derive(Serialize, Deserialize)]
struct ExportedPreset {
    exported_at: DateTime<Utc>,
    preset: Preset,
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("preset name must not be empty"));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, Default)]
struct PresetState {
    presets: BTreeMap<String, Preset>,
    /// Name of the preset most recently used to run jobs.
    last_used: Option<String>,
}

/// Parse a preset file: the `presets` array, skipping entries that do not
/// deserialize, and the `last_used` name.
fn parse_presets(value: Value, path: &Path) -> (Vec<Preset>, Option<String>) {
    let mut map = match value {
        Value::Object(map) => map,
        _ => {
            warn!(path = %path.display(), "Preset file is not a JSON object, ignoring");
            return (Vec::new(), None);
        }
    };
    let last_used = match map.remove("last_used") {
        Some(Value::String(name)) => Some(name),
        _ => None,
    };
    let entries = match map.remove("presets") {
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            warn!(path = %path.display(), "Preset file `presets` is not an array, ignoring");
            return (Vec::new(), None);
        }
        None => return (Vec::new(), None),
    };

    let presets = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Preset>(entry) {
            Ok(preset) if !preset.name.trim().is_empty() => Some(preset),
            Ok(_) => {
                warn!(index, "Skipping preset without a name");
                None
            }
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed preset");
                None
            }
        })
        .collect();
    (presets, last_used)
}

/// File-backed preset store.
///
/// All presets are kept in memory and every mutation rewrites the file.
pub struct PresetStore {
    path: PathBuf,
    state: Mutex<PresetState>,
}

impl PresetStore {
    /// Open the store at `path`, loading whatever valid presets it holds.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            state: Mutex::new(PresetState::default()),
        };
        store.load_presets()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory presets.
    ///
    /// A missing file yields no presets; malformed entries are skipped. A
    /// last-used name that no longer matches a preset is dropped.
    pub fn load_presets(&self) -> Result<Vec<Preset>> {
        let (loaded, last_used) = match read_json::<Value>(&self.path)? {
            Some(value) => parse_presets(value, &self.path),
            None => (Vec::new(), None),
        };

        let presets: BTreeMap<String, Preset> = loaded
            .iter()
            .map(|preset| (preset.name.clone(), preset.clone()))
            .collect();
        let last_used = last_used.filter(|name| presets.contains_key(name));
        *self.state.lock() = PresetState { presets, last_used };

        debug!(path = %self.path.display(), count = loaded.len(), "Loaded presets");
        Ok(loaded)
    }

    /// Replace every stored preset with `presets`.
    pub fn save_presets(&self, presets: &[Preset]) -> Result<()> {
        let mut replaced = BTreeMap::new();
        for preset in presets {
            let name = validate_name(&preset.name)?;
            replaced.insert(name.to_string(), preset.clone());
        }
        self.update(|state| {
            state.presets = replaced;
            Ok(())
        })
    }

    fn write(&self, state: &PresetState) -> Result<()> {
        let file = PresetFileRef {
            presets: state.presets.values().collect(),
            last_used: state.last_used.as_deref(),
        };
        write_json_atomic(&self.path, &file).inspect_err(|e| {
            warn!(path = %self.path.display(), "Failed to write presets: {}", e);
        })
    }

    /// Apply `mutate` to a copy of the presets and persist it; memory only
    /// changes when the write succeeds.
    fn update<T>(&self, mutate: impl FnOnce(&mut PresetState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = mutate(&mut next)?;
        if next
            .last_used
            .as_ref()
            .is_some_and(|name| !next.presets.contains_key(name))
        {
            next.last_used = None;
        }
        self.write(&next)?;
        *state = next;
        Ok(out)
    }

    /// Store a preset. An existing preset of the same name is only replaced
    /// when `overwrite` is set.
    pub fn save(&self, mut preset: Preset, overwrite: bool) -> Result<()> {
        let name = validate_name(&preset.name)?.to_string();
        preset.name = name.clone();

        self.update(|state| {
            let presets = &mut state.presets;
            if let Some(existing) = presets.get(&name) {
                if !overwrite {
                    return Err(Error::already_exists("Preset", &name));
                }
                preset.created_at = existing.created_at;
                preset.is_default = existing.is_default;
            }
            preset.updated_at = Utc::now();
            presets.insert(name.clone(), preset);
            Ok(())
        })?;

        info!(preset = %name, "Saved preset");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Preset> {
        self.state.lock().presets.get(name).cloned()
    }

    /// Preset names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().presets.keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Preset> {
        self.state.lock().presets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().presets.len()
    }

    /// The preset most recently used to run jobs, if it still exists.
    pub fn last_used(&self) -> Option<String> {
        self.state.lock().last_used.clone()
    }

    /// Remember `name` as the last-used preset.
    pub fn set_last_used(&self, name: &str) -> Result<()> {
        self.update(|state| {
            if !state.presets.contains_key(name) {
                return Err(Error::not_found("Preset", name));
            }
            state.last_used = Some(name.to_string());
            Ok(())
        })?;
        debug!(preset = %name, "Updated last-used preset");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.update(|state| {
            let presets = &mut state.presets;
            match presets.get(name) {
                None => return Err(Error::not_found("Preset", name)),
                Some(preset) if preset.is_default => {
                    return Err(Error::validation(format!(
                        "preset '{name}' is built in and cannot be deleted"
                    )));
                }
                Some(_) => {}
            }
            presets.remove(name);
            Ok(())
        })?;
        info!(preset = %name, "Deleted preset");
        Ok(())
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let new_name = validate_name(new_name)?.to_string();
        self.update(|state| {
            let presets = &mut state.presets;
            if presets.contains_key(&new_name) {
                return Err(Error::already_exists("Preset", &new_name));
            }
            let mut preset = presets
                .remove(old_name)
                .ok_or_else(|| Error::not_found("Preset", old_name))?;
            if preset.is_default {
                return Err(Error::validation(format!(
                    "preset '{old_name}' is built in and cannot be renamed"
                )));
            }
            preset.name = new_name.clone();
            preset.updated_at = Utc::now();
            presets.insert(new_name.clone(), preset);
            if state.last_used.as_deref() == Some(old_name) {
                state.last_used = Some(new_name.clone());
            }
            Ok(())
        })?;
        info!(from = %old_name, to = %new_name, "Renamed preset");
        Ok(())
    }

    /// Copy `source` under `new_name`. The copy is never a built-in.
    pub fn duplicate(&self, source: &str, new_name: &str) -> Result<Preset> {
        let new_name = validate_name(new_name)?.to_string();
        self.update(|state| {
            let presets = &mut state.presets;
            if presets.contains_key(&new_name) {
                return Err(Error::already_exists("Preset", &new_name));
            }
            let original = presets
                .get(source)
                .ok_or_else(|| Error::not_found("Preset", source))?;
            let copy = Preset::new(new_name.clone(), original.parameters.clone())
                .with_description(format!("Copy of {source}"));
            presets.insert(new_name.clone(), copy.clone());
            Ok(copy)
        })
    }

    /// Write one preset to a standalone file.
    pub fn export(&self, name: &str, path: &Path) -> Result<()> {
        let preset = self
            .get(name)
            .ok_or_else(|| Error::not_found("Preset", name))?;
        write_json_atomic(
            path,
            &ExportedPreset {
                exported_at: Utc::now(),
                preset,
            },
        )
    }

    /// Import a preset written by [`PresetStore::export`], optionally under a
    /// new name. Never overwrites an existing preset.
    pub fn import(&self, path: &Path, new_name: Option<&str>) -> Result<Preset> {
        let exported: ExportedPreset = read_json(path)?
            .ok_or_else(|| Error::not_found("Preset file", path.display().to_string()))?;

        let mut preset = exported.preset;
        if let Some(name) = new_name {
            preset.name = name.to_string();
        }
        preset.name = validate_name(&preset.name)?.to_string();
        preset.is_default = false;
        preset.updated_at = Utc::now();

        self.update(|state| {
            let presets = &mut state.presets;
            if presets.contains_key(&preset.name) {
                return Err(Error::already_exists("Preset", &preset.name));
            }
            presets.insert(preset.name.clone(), preset.clone());
            Ok(())
        })?;

        info!(preset = %preset.name, "Imported preset");
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PresetStore {
        PresetStore::open(dir.path().join("presets.json")).unwrap()
    }

    fn preset(name: &str) -> Preset {
        Preset::new(name, JobParameters::new().with("fps", 30))
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("fast"), false).unwrap();
        presets.save(preset("slow"), false).unwrap();

        let reopened = store(&dir);
        assert_eq!(reopened.names(), vec!["fast", "slow"]);
        assert_eq!(
            reopened.get("fast").unwrap().parameters.get_u64("fps"),
            Some(30)
        );
    }

    #[test]
    fn test_overwrite_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("fast"), false).unwrap();

        let err = presets.save(preset("fast"), false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));

        let updated = Preset::new("fast", JobParameters::new().with("fps", 60));
        presets.save(updated, true).unwrap();
        assert_eq!(presets.get("fast").unwrap().parameters.get_u64("fps"), Some(60));
    }

    #[test]
    fn test_load_tolerates_bad_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("presets.json");
        std::fs::write(
            &path,
            serde_json::to_vec(&json!({
                "version": 3,
                "presets": [
                    {"name": "minimal"},
                    {"name": "full", "parameters": {"fps": 24}, "extra": true},
                    {"parameters": {"fps": 1}},
                    {"name": 42},
                    "garbage"
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let presets = PresetStore::open(&path).unwrap();
        assert_eq!(presets.names(), vec!["full", "minimal"]);
        assert!(presets.get("minimal").unwrap().parameters.is_empty());
    }

    #[test]
    fn test_save_presets_replaces_everything() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("old"), false).unwrap();

        presets
            .save_presets(&[preset("a"), preset("b")])
            .unwrap();
        assert_eq!(presets.names(), vec!["a", "b"]);
        assert_eq!(presets.load_presets().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_and_rename() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("a"), false).unwrap();
        presets.save(preset("b"), false).unwrap();

        presets.rename("a", "c").unwrap();
        assert!(presets.get("a").is_none());
        assert_eq!(presets.get("c").unwrap().name, "c");

        assert!(matches!(
            presets.rename("b", "c"),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(matches!(
            presets.delete("missing"),
            Err(Error::NotFound { .. })
        ));

        presets.delete("b").unwrap();
        assert_eq!(store(&dir).names(), vec!["c"]);
    }

    #[test]
    fn test_built_in_presets_are_protected() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        let mut builtin = preset("standard");
        builtin.is_default = true;
        presets.save_presets(&[builtin]).unwrap();

        assert!(matches!(
            presets.delete("standard"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            presets.rename("standard", "other"),
            Err(Error::Validation(_))
        ));

        let copy = presets.duplicate("standard", "mine").unwrap();
        assert!(!copy.is_default);
        assert_eq!(copy.description, "Copy of standard");
    }

    #[test]
    fn test_export_import() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("share"), false).unwrap();

        let export_path = dir.path().join("export/share.json");
        presets.export("share", &export_path).unwrap();

        assert!(matches!(
            presets.import(&export_path, None),
            Err(Error::AlreadyExists { .. })
        ));

        let imported = presets.import(&export_path, Some("shared copy")).unwrap();
        assert_eq!(imported.name, "shared copy");
        assert_eq!(imported.parameters.get_u64("fps"), Some(30));
        assert_eq!(presets.len(), 2);
    }

    #[test]
    fn test_last_used_follows_renames_and_deletes() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        presets.save(preset("web"), false).unwrap();
        presets.save(preset("archive"), false).unwrap();
        assert_eq!(presets.last_used(), None);

        assert!(matches!(
            presets.set_last_used("missing"),
            Err(Error::NotFound { .. })
        ));
        presets.set_last_used("web").unwrap();
        assert_eq!(store(&dir).last_used().as_deref(), Some("web"));

        presets.rename("web", "web-hd").unwrap();
        assert_eq!(presets.last_used().as_deref(), Some("web-hd"));
        assert_eq!(store(&dir).last_used().as_deref(), Some("web-hd"));

        presets.delete("web-hd").unwrap();
        assert_eq!(presets.last_used(), None);
        assert_eq!(store(&dir).last_used(), None);
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = TempDir::new().unwrap();
        let presets = store(&dir);
        assert!(matches!(
            presets.save(preset("  "), false),
            Err(Error::Validation(_))
        ));
        assert!(presets.is_empty());
    }
}
