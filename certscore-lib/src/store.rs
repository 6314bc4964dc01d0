//! Persistence of verified links.
//!
//! The orchestrator only needs create, list-all and delete-all. Each call is
//! atomic on its own; no lock is held across an `.await`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use uuid::Uuid;

/// A persisted endpoint whose chain was fetched successfully. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable record of verified links.
pub trait ResultStore: Send + Sync {
    fn create(&self, url: &str) -> Result<Link, StoreError>;

    /// All links in insertion order.
    fn list_all(&self) -> Result<Vec<Link>, StoreError>;

    /// Remove every link and return how many there were.
    fn delete_all(&self) -> Result<usize, StoreError>;
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock().map_err(|_| StoreError::Poisoned)
}

/// Process-local store, used in tests and for `--store :memory:`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    links: Mutex<Vec<Link>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryStore {
    fn create(&self, url: &str) -> Result<Link, StoreError> {
        let link = Link::new(url);
        lock(&self.links)?.push(link.clone());
        Ok(link)
    }

    fn list_all(&self) -> Result<Vec<Link>, StoreError> {
        Ok(lock(&self.links)?.clone())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut links = lock(&self.links)?;
        let count = links.len();
        links.clear();
        Ok(count)
    }
}

/// A JSON array on disk, rewritten in full on every change.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    links: Mutex<Vec<Link>>,
}

impl JsonFileStore {
    /// Open `path`, creating an empty store if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let links = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), links = links.len(), "opened link store");
        Ok(Self {
            path,
            links: Mutex::new(links),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, links: &[Link]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(links).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl ResultStore for JsonFileStore {
    fn create(&self, url: &str) -> Result<Link, StoreError> {
        let mut links = lock(&self.links)?;
        let link = Link::new(url);
        links.push(link.clone());
        if let Err(e) = self.persist(&links) {
            links.pop();
            return Err(e);
        }
        Ok(link)
    }

    fn list_all(&self) -> Result<Vec<Link>, StoreError> {
        Ok(lock(&self.links)?.clone())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut links = lock(&self.links)?;
        let count = links.len();
        self.persist(&[])?;
        links.clear();
        Ok(count)
    }
}
