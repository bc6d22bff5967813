//! Filesystem model store.
//!
//! Layout: `{root}/{category}/{entity}.model.zst`, one zstd-compressed
//! MessagePack file per model key. Path components are sanitized; the real
//! key is stored inside the file and is what `list` reports.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use voltwatch_compute::{ComputeResult, ModelHandle, ModelKey, ModelStore, TrainedModel};
use voltwatch_core::StorageConfig;

use crate::error::StorageError;

const FORMAT_VERSION: u32 = 1;
const EXTENSION: &str = "model.zst";
const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize, Deserialize)]
struct StoredModel {
    format_version: u32,
    model: TrainedModel,
}

/// Replace anything outside `[alphanumeric - _ .]` so a key maps to one path
/// component. Leading dots are escaped as well.
pub fn sanitize_component(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with('.') {
        out.insert(0, '_');
    }
    out
}

pub struct LocalModelStore {
    root: PathBuf,
}

impl LocalModelStore {
    /// Open (and create) the store directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "model store opened");
        Ok(Self { root })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(&config.model_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ModelKey) -> PathBuf {
        self.root
            .join(sanitize_component(&key.category))
            .join(format!("{}.{EXTENSION}", sanitize_component(&key.entity)))
    }

    fn write(&self, model: &TrainedModel) -> Result<ModelHandle, StorageError> {
        let path = self.path_for(&model.key);
        if path.exists() {
            let existing = self.read(&path)?;
            if existing.key != model.key {
                return Err(StorageError::Other(format!(
                    "{} and {} map to the same file {}",
                    existing.key,
                    model.key,
                    path.display()
                )));
            }
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let stored = StoredModel {
            format_version: FORMAT_VERSION,
            model: model.clone(),
        };
        let packed = rmp_serde::to_vec_named(&stored)?;
        let compressed = zstd::encode_all(packed.as_slice(), ZSTD_LEVEL)?;

        write_atomic(&path, &compressed)?;

        debug!(key = %model.key, bytes = compressed.len(), path = %path.display(), "model saved");
        Ok(ModelHandle {
            key: model.key.clone(),
            location: path.to_string_lossy().into_owned(),
        })
    }

    fn read(&self, path: &Path) -> Result<TrainedModel, StorageError> {
        let compressed = fs::read(path)?;
        let packed = zstd::decode_all(compressed.as_slice())?;
        let stored: StoredModel = rmp_serde::from_slice(&packed)?;
        if stored.format_version != FORMAT_VERSION {
            return Err(StorageError::Version(stored.format_version));
        }
        Ok(stored.model)
    }

    fn model_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).follow_links(true) {
            let entry = entry?;
            let path = entry.path();
            let is_model = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&format!(".{EXTENSION}")));
            if entry.file_type().is_file() && is_model {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn scan(&self) -> Result<Vec<ModelHandle>, StorageError> {
        let mut handles = Vec::new();
        for path in self.model_files()? {
            match self.read(&path) {
                Ok(model) => handles.push(ModelHandle {
                    key: model.key,
                    location: path.to_string_lossy().into_owned(),
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable model file skipped"),
            }
        }
        handles.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(handles)
    }
}

impl ModelStore for LocalModelStore {
    fn save(&self, model: &TrainedModel) -> ComputeResult<ModelHandle> {
        Ok(self.write(model)?)
    }

    fn load(&self, handle: &ModelHandle) -> ComputeResult<TrainedModel> {
        let path = if handle.location.is_empty() {
            self.path_for(&handle.key)
        } else {
            PathBuf::from(&handle.location)
        };
        Ok(self.read(&path)?)
    }

    fn list(&self) -> ComputeResult<Vec<ModelHandle>> {
        Ok(self.scan()?)
    }

    fn remove(&self, handle: &ModelHandle) -> ComputeResult<bool> {
        let path = self.path_for(&handle.key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %handle.key, "model removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }
}

/// Write `bytes` next to `path` and rename into place so readers never see a
/// partial file. The temporary file is removed when any step fails.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    let result = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
