//! JSON-backed preset storage.
//!
//! Two layouts share one write policy:
//! - scope documents at `{strategies_dir}/{scope}/presets.json`, an object
//!   mapping preset name to a parameter bag carrying an `isActive` flag;
//! - file-keyed documents at `{presets_dir}/{path}`, each a raw parameter bag.
//!
//! Every write is a read-modify-write performed under a per-document lock and
//! finished with a temp-file rename, so readers (which never lock) only ever
//! see a complete document. The lock is an in-process mutex plus an advisory
//! lock on a hidden sibling file, which also serialises separate processes.

use crate::error::EngineError;
use crate::preset_name::PresetName;
use dashmap::DashMap;
use fs4::fs_std::FileExt;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;
use walkdir::WalkDir;

pub const PRESETS_FILE_NAME: &str = "presets.json";
pub const ACTIVE_FLAG: &str = "isActive";

/// Lock and staging files start with this; stored names may not.
const ARTIFACT_PREFIX: &str = ".stratbench-";

pub type ParameterBag = Map<String, Value>;

#[derive(Clone)]
pub struct PresetStore {
    strategies_dir: PathBuf,
    presets_dir: PathBuf,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PresetStore {
    pub fn new(strategies_dir: impl Into<PathBuf>, presets_dir: impl Into<PathBuf>) -> Self {
        Self {
            strategies_dir: strategies_dir.into(),
            presets_dir: presets_dir.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn scope_document_path(&self, scope: &str) -> Result<PathBuf, EngineError> {
        let relative = normalize_relative_path(scope)?;
        Ok(self.strategies_dir.join(relative).join(PRESETS_FILE_NAME))
    }

    pub fn file_document_path(&self, path: &str) -> Result<PathBuf, EngineError> {
        let relative = normalize_relative_path(path)?;
        if relative.components().any(|part| is_artifact_name(part.as_os_str())) {
            return Err(EngineError::InvalidPath {
                path: path.to_string(),
                reason: format!("names starting with `{}` are reserved", ARTIFACT_PREFIX),
            });
        }
        Ok(self.presets_dir.join(relative))
    }

    /// Preset names in document order; empty when the scope has no document.
    pub fn list(&self, scope: &str) -> Result<Vec<String>, EngineError> {
        let path = self.scope_document_path(scope)?;
        let Some(collection) = read_collection(&path)? else {
            return Ok(Vec::new());
        };
        Ok(collection.keys().cloned().collect())
    }

    pub fn load(&self, scope: &str, preset_name: &str) -> Result<Option<ParameterBag>, EngineError> {
        let name = PresetName::parse(preset_name)?;
        let path = self.scope_document_path(scope)?;
        let Some(mut collection) = read_collection(&path)? else {
            return Ok(None);
        };
        Ok(match collection.remove(&name.to_string()) {
            Some(Value::Object(bag)) => Some(bag),
            _ => None,
        })
    }

    /// The preset currently flagged active in the scope, if any.
    pub fn active(&self, scope: &str) -> Result<Option<(String, ParameterBag)>, EngineError> {
        let path = self.scope_document_path(scope)?;
        let Some(collection) = read_collection(&path)? else {
            return Ok(None);
        };
        Ok(collection.into_iter().find_map(|(name, preset)| match preset {
            Value::Object(bag) if is_active(&bag) => Some((name, bag)),
            _ => None,
        }))
    }

    /// Stores `inputs` under `preset_name`, making it the only active preset.
    pub fn save(
        &self,
        scope: &str,
        preset_name: &str,
        mut inputs: ParameterBag,
    ) -> Result<(), EngineError> {
        let name = PresetName::parse(preset_name)?;
        let path = self.scope_document_path(scope)?;
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLockGuard::acquire(&path)?;

        let mut collection = match read_for_update(&path)? {
            Some(text) => parse_collection(&path, &text)?,
            None => Map::new(),
        };

        let mut deactivated = 0usize;
        for preset in collection.values_mut() {
            if let Value::Object(bag) = preset {
                if is_active(bag) {
                    deactivated += 1;
                }
                bag.insert(ACTIVE_FLAG.to_string(), Value::Bool(false));
            }
        }

        inputs.insert(ACTIVE_FLAG.to_string(), Value::Bool(true));
        collection.insert(name.to_string(), Value::Object(inputs));
        write_document_atomic(&path, &Value::Object(collection))?;

        info!(
            "Saved preset `{}` in scope `{}` (deactivated {} sibling(s))",
            name, scope, deactivated
        );
        Ok(())
    }

    /// Removes `preset_name` and whatever its temporary-version rule covers.
    /// Returns the removed names; an empty result is still a success.
    pub fn delete(&self, scope: &str, preset_name: &str) -> Result<Vec<String>, EngineError> {
        let target = PresetName::parse(preset_name)?;
        let path = self.scope_document_path(scope)?;
        if !path.exists() {
            debug!("No preset document for scope `{}`; nothing to delete", scope);
            return Ok(Vec::new());
        }
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLockGuard::acquire(&path)?;

        let Some(text) = read_for_update(&path)? else {
            return Ok(Vec::new());
        };
        let collection = parse_collection(&path, &text)?;

        let mut deleted = Vec::new();
        let mut kept = Map::new();
        for (name, preset) in collection {
            if target.deletes(&PresetName::classify(&name)) {
                deleted.push(name);
            } else {
                kept.insert(name, preset);
            }
        }

        if deleted.is_empty() {
            debug!(
                "Delete of `{}` in scope `{}` matched no presets",
                target, scope
            );
            return Ok(deleted);
        }

        write_document_atomic(&path, &Value::Object(kept))?;
        info!(
            "Deleted {} preset(s) for `{}` in scope `{}`: {:?}",
            deleted.len(),
            target,
            scope,
            deleted
        );
        Ok(deleted)
    }

    /// Every stored file under the presets root as a `/`-separated relative path.
    pub fn list_tree(&self) -> Vec<String> {
        if !self.presets_dir.is_dir() {
            return Vec::new();
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.presets_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable preset tree entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_artifact_name(entry.file_name()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.presets_dir) else {
                continue;
            };
            let joined = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(joined);
        }

        entries.sort();
        entries
    }

    pub fn load_file(&self, path: &str) -> Result<Option<Value>, EngineError> {
        let document_path = self.file_document_path(path)?;
        let Some(text) = read_for_query(&document_path) else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| corrupt(&document_path, err))
    }

    pub fn save_file(&self, path: &str, inputs: ParameterBag) -> Result<(), EngineError> {
        let document_path = self.file_document_path(path)?;
        let lock = self.lock_for(&document_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLockGuard::acquire(&document_path)?;

        if let Some(existing) = read_for_update(&document_path)? {
            serde_json::from_str::<Value>(&existing).map_err(|err| corrupt(&document_path, err))?;
        }

        write_document_atomic(&document_path, &Value::Object(inputs))?;
        info!("Saved preset file `{}`", path);
        Ok(())
    }

    /// Returns whether a file was actually removed.
    pub fn delete_file(&self, path: &str) -> Result<bool, EngineError> {
        let document_path = self.file_document_path(path)?;
        if !document_path.is_file() {
            return Ok(false);
        }
        let lock = self.lock_for(&document_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = FileLockGuard::acquire(&document_path)?;

        match fs::remove_file(&document_path) {
            Ok(()) => {
                info!("Deleted preset file `{}`", path);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(EngineError::io(document_path, err)),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Exclusive advisory lock on `.stratbench-<name>.lock` next to a document,
/// released on drop.
pub(crate) struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub(crate) fn acquire(document_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = document_path.parent() {
            fs::create_dir_all(parent).map_err(|err| EngineError::io(parent, err))?;
        }
        let path = artifact_path(document_path, "lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| EngineError::io(&path, err))?;
        FileExt::lock_exclusive(&file).map_err(|err| EngineError::io(&path, err))?;
        Ok(Self { file, path })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), err);
        }
    }
}

fn is_active(bag: &ParameterBag) -> bool {
    matches!(bag.get(ACTIVE_FLAG), Some(Value::Bool(true)))
}

/// Rebuilds a caller-supplied relative path from its normal components,
/// rejecting anything that could escape the storage root.
fn normalize_relative_path(raw: &str) -> Result<PathBuf, EngineError> {
    let invalid = |reason: &str| EngineError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut normalized = PathBuf::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory segments are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative"))
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid("path must not be empty"));
    }
    Ok(normalized)
}

fn read_collection(path: &Path) -> Result<Option<ParameterBag>, EngineError> {
    match read_for_query(path) {
        Some(text) => parse_collection(path, &text).map(Some),
        None => Ok(None),
    }
}

fn parse_collection(path: &Path, text: &str) -> Result<ParameterBag, EngineError> {
    let value: Value = serde_json::from_str(text).map_err(|err| corrupt(path, err))?;
    let Value::Object(collection) = value else {
        return Err(corrupt(path, "top-level value is not an object"));
    };
    if let Some((name, _)) = collection.iter().find(|(_, preset)| !preset.is_object()) {
        return Err(corrupt(path, format!("preset `{}` is not an object", name)));
    }
    Ok(collection)
}

/// Read used by queries: any failure other than a parse error reads as absent.
fn read_for_query(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!("Treating unreadable document {} as absent: {}", path.display(), err);
            None
        }
    }
}

/// Read used inside a write section: only a missing file reads as absent.
fn read_for_update(path: &Path) -> Result<Option<String>, EngineError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::io(path, err)),
    }
}

pub(crate) fn write_document_atomic(path: &Path, document: &Value) -> Result<(), EngineError> {
    let tmp_path = stage_document(path, document)?;
    commit_staged(&tmp_path, path)
}

/// Writes `document` to a uniquely named hidden sibling of `path` and returns
/// the staged path.
pub(crate) fn stage_document(path: &Path, document: &Value) -> Result<PathBuf, EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| EngineError::io(parent, err))?;
    }

    let rendered = serde_json::to_string_pretty(document).map_err(|err| {
        EngineError::io(path, io::Error::new(io::ErrorKind::InvalidData, err))
    })?;

    let tmp_path = artifact_path(path, &format!("{}.tmp", Uuid::new_v4().simple()));
    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(rendered.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(EngineError::io(tmp_path, err));
    }
    Ok(tmp_path)
}

pub(crate) fn commit_staged(tmp_path: &Path, path: &Path) -> Result<(), EngineError> {
    fs::rename(tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(tmp_path);
        EngineError::io(path, err)
    })
}

pub(crate) fn artifact_path(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}.{}", ARTIFACT_PREFIX, file_name, suffix))
}

fn is_artifact_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with(ARTIFACT_PREFIX)
}

fn corrupt(path: &Path, reason: impl ToString) -> EngineError {
    EngineError::CorruptStore {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
