//! JSON file persistence for per-adapter records.
//!
//! Each record lives in `<dir>/<key>.json`. Writes go through a temporary
//! file and a rename so a crash never leaves a half-written record behind.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Directory of JSON records keyed by adapter id.
#[derive(Debug, Clone)]
pub struct JsonDirStore<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDirStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load the record for `key`. `Ok(None)` if it was never written.
    pub async fn load(&self, key: &str) -> Result<Option<T>> {
        read_json(&self.path_for(key)).await
    }

    pub async fn save(&self, key: &str, value: &T) -> Result<()> {
        write_json(&self.path_for(key), value).await
    }
}

/// Read and parse a JSON file; a missing file is `Ok(None)`, a malformed one
/// is a config error naming the file.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid JSON in {}: {e}", path.display())))
}

/// Serialize `value` and atomically replace `path`.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!("Wrote {} bytes to {}", body.len(), path.display());
    Ok(())
}
