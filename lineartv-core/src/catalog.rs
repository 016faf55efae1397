use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to decode catalog {path}: {source}")]
    Decode {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("failed to encode catalog: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
    pub file_path: PathBuf,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    pub file_size: u64,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentMovie {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub current: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    #[serde(default)]
    pub queue: Vec<Movie>,
    #[serde(default)]
    pub schedule: Vec<ScheduleRow>,
    #[serde(default)]
    pub current_movie: Option<CurrentMovie>,
}

/// Catalog of every channel, persisted as one JSON document. The file is
/// rewritten whole after each mutation via write-temp-then-rename, so the
/// on-disk snapshot is always a valid catalog and the in-memory queue never
/// diverges from it across a restart.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    channels: Mutex<BTreeMap<String, ChannelRecord>>,
}

impl CatalogStore {
    pub fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let channels = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| CatalogError::Decode {
                source,
                path: path.clone(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(CatalogError::Io {
                    source,
                    path: path.clone(),
                })
            }
        };
        Ok(Self {
            path,
            channels: Mutex::new(channels),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.lock().unwrap().keys().cloned().collect()
    }

    pub fn channel(&self, id: &str) -> Option<ChannelRecord> {
        self.channels.lock().unwrap().get(id).cloned()
    }

    /// Creates the channel record if absent. Returns true when a new record
    /// was created.
    pub fn upsert_channel(&self, id: &str, name: &str) -> CatalogResult<bool> {
        let mut channels = self.channels.lock().unwrap();
        if channels.contains_key(id) {
            return Ok(false);
        }
        channels.insert(
            id.to_string(),
            ChannelRecord {
                name: name.to_string(),
                ..ChannelRecord::default()
            },
        );
        self.persist(&channels)?;
        debug!(channel = id, "catalog record created");
        Ok(true)
    }

    /// Appends to the persisted queue, returning the new queue length.
    pub fn append_movie(&self, id: &str, movie: Movie) -> CatalogResult<usize> {
        let mut channels = self.channels.lock().unwrap();
        let record = channels
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownChannel(id.to_string()))?;
        record.queue.push(movie);
        let len = record.queue.len();
        self.persist(&channels)?;
        Ok(len)
    }

    /// Removes and returns the head of the queue.
    pub fn shift_queue(&self, id: &str) -> CatalogResult<Option<Movie>> {
        let mut channels = self.channels.lock().unwrap();
        let record = channels
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownChannel(id.to_string()))?;
        if record.queue.is_empty() {
            return Ok(None);
        }
        let head = record.queue.remove(0);
        self.persist(&channels)?;
        Ok(Some(head))
    }

    pub fn queue(&self, id: &str) -> CatalogResult<Vec<Movie>> {
        let channels = self.channels.lock().unwrap();
        let record = channels
            .get(id)
            .ok_or_else(|| CatalogError::UnknownChannel(id.to_string()))?;
        Ok(record.queue.clone())
    }

    pub fn queue_head(&self, id: &str) -> CatalogResult<Option<Movie>> {
        Ok(self.queue(id)?.into_iter().next())
    }

    pub fn queue_len(&self, id: &str) -> CatalogResult<usize> {
        Ok(self.queue(id)?.len())
    }

    pub fn set_current(&self, id: &str, current: Option<CurrentMovie>) -> CatalogResult<()> {
        let mut channels = self.channels.lock().unwrap();
        let record = channels
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownChannel(id.to_string()))?;
        record.current_movie = current;
        self.persist(&channels)
    }

    pub fn set_schedule(&self, id: &str, schedule: Vec<ScheduleRow>) -> CatalogResult<()> {
        let mut channels = self.channels.lock().unwrap();
        let record = channels
            .get_mut(id)
            .ok_or_else(|| CatalogError::UnknownChannel(id.to_string()))?;
        record.schedule = schedule;
        self.persist(&channels)
    }

    fn persist(&self, channels: &BTreeMap<String, ChannelRecord>) -> CatalogResult<()> {
        let encoded = serde_json::to_vec_pretty(channels).map_err(CatalogError::Encode)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CatalogError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let temp = self
            .path
            .with_extension(format!("json.{}", Uuid::new_v4().simple()));
        fs::write(&temp, &encoded).map_err(|source| CatalogError::Io {
            source,
            path: temp.clone(),
        })?;
        fs::rename(&temp, &self.path).map_err(|source| CatalogError::Io {
            source,
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn movie(title: &str) -> Movie {
        Movie {
            title: title.to_string(),
            file_path: PathBuf::from(format!("/media/{title}.mp4")),
            added_by: "uploader".to_string(),
            added_at: Utc::now(),
            file_size: 1024,
            format: Some("mp4".to_string()),
        }
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path().join("channels.json")).unwrap();
        assert!(store.channel_ids().is_empty());
    }

    #[test]
    fn upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path().join("channels.json")).unwrap();
        assert!(store.upsert_channel("films", "Films").unwrap());
        assert!(!store.upsert_channel("films", "Renamed").unwrap());
        assert_eq!(store.channel("films").unwrap().name, "Films");
    }

    #[test]
    fn queue_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.json");
        let store = CatalogStore::open(&path).unwrap();
        store.upsert_channel("films", "Films").unwrap();
        store.append_movie("films", movie("alpha")).unwrap();
        store.append_movie("films", movie("beta")).unwrap();

        let reopened = CatalogStore::open(&path).unwrap();
        let queue = reopened.queue("films").unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].title, "alpha");

        let head = reopened.shift_queue("films").unwrap().unwrap();
        assert_eq!(head.title, "alpha");
        let again = CatalogStore::open(&path).unwrap();
        assert_eq!(again.queue_head("films").unwrap().unwrap().title, "beta");
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.json");
        let store = CatalogStore::open(&path).unwrap();
        store.upsert_channel("films", "Films").unwrap();
        store.append_movie("films", movie("alpha")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("channels.json")]);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path().join("channels.json")).unwrap();
        assert!(matches!(
            store.append_movie("ghost", movie("alpha")),
            Err(CatalogError::UnknownChannel(_))
        ));
    }
}
