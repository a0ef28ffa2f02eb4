use crate::error::{AppError, Result};
use crate::models::{Location, RawPayload};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable staging area for fetched payloads.
///
/// Every save creates a new file; nothing is deduplicated or overwritten, so
/// repeated runs accumulate artifacts and downstream stages see all of them.
pub struct RawStore {
    dir: PathBuf,
}

/// A stored artifact, identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawHandle {
    pub path: PathBuf,
}

impl RawStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a payload. The file name encodes location and fetch time for
    /// humans; the envelope inside is the source of truth for both.
    pub fn save(&self, location: &Location, payload: &RawPayload) -> Result<RawHandle> {
        std::fs::create_dir_all(&self.dir)?;

        let file_name = format!(
            "{}_raw_{}.json",
            location.slug(),
            payload.fetched_at.format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = self.dir.join(file_name);

        // Never clobber an existing artifact, even within the same millisecond.
        let path = unique_path(path);

        // `.json.tmp` is invisible to `list_all` until renamed into place.
        let body = serde_json::to_vec_pretty(payload)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;

        info!("Saved raw payload for {} to {}", location.name, path.display());
        Ok(RawHandle { path })
    }

    /// All stored artifacts, sorted by file name.
    pub fn list_all(&self) -> Result<Vec<RawHandle>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let dir = self.dir.to_str().ok_or_else(|| {
            AppError::Config(format!(
                "Raw directory path is not valid UTF-8: {}",
                self.dir.display()
            ))
        })?;
        let pattern = Path::new(&glob::Pattern::escape(dir)).join("*.json");
        let pattern = pattern.to_string_lossy();

        let mut handles = Vec::new();
        for entry in glob::glob(&pattern)
            .map_err(|e| AppError::Config(format!("Invalid raw glob pattern: {}", e)))?
        {
            let path = entry.map_err(|e| AppError::Io(e.into_error()))?;
            handles.push(RawHandle { path });
        }

        handles.sort();
        debug!("Found {} raw artifacts in {}", handles.len(), self.dir.display());
        Ok(handles)
    }

    pub fn load(&self, handle: &RawHandle) -> Result<RawPayload> {
        let bytes = std::fs::read(&handle.path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::MalformedPayload(format!(
                "{} is not a raw payload envelope: {}",
                handle.path.display(),
                e
            ))
        })
    }
}

fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    (1..)
        .map(|n| parent.join(format!("{}-{}.json", stem, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
