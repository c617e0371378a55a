//! JSON document persistence.
//!
//! Three documents back the whole system: recordings, saved streams, and
//! settings. Each is cached in memory after the first read and replaced on
//! disk atomically (write to a sibling temp file, then rename). Hot-path
//! writers may update the cache only; the next durable write flushes
//! whatever the cache holds.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::model::{Recording, SavedStream};
use crate::result::Result;
use crate::settings::{Settings, SettingsPatch};

/// Whether a mutation must reach the disk before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    CacheOnly,
}

/// One cached JSON document. All access is serialized through the lock, so
/// read-modify-write cycles cannot interleave.
pub struct JsonDoc<T> {
    path: PathBuf,
    cache: RwLock<Option<T>>,
}

impl<T> JsonDoc<T>
where
    T: Clone + Default + Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(None),
        }
    }

    pub async fn read(&self) -> T {
        if let Some(v) = self.cache.read().await.as_ref() {
            return v.clone();
        }
        let mut cache = self.cache.write().await;
        if let Some(v) = cache.as_ref() {
            return v.clone();
        }
        let loaded = load_or_default::<T>(&self.path);
        *cache = Some(loaded.clone());
        loaded
    }

    /// Apply `mutate` to the cached document. With [`Durability::Durable`]
    /// the whole document is rewritten on disk; a failed disk write keeps
    /// the cache update and surfaces the error.
    pub async fn mutate<F, R>(&self, durability: Durability, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(load_or_default(&self.path));
        }
        let doc = cache.as_mut().unwrap();
        let out = mutate(doc);
        if durability == Durability::Durable {
            write_atomic(&self.path, doc)?;
        }
        Ok(out)
    }

    /// Rewrite the document from the cache without mutating it.
    pub async fn flush(&self) -> Result<()> {
        let cache = self.cache.read().await;
        if let Some(doc) = cache.as_ref() {
            write_atomic(&self.path, doc)?;
        }
        Ok(())
    }
}

fn load_or_default<T>(path: &Path) -> T
where
    T: Default + DeserializeOwned,
{
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!("corrupt document {}: {e}; starting empty", path.display());
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("document {} absent, starting empty", path.display());
            T::default()
        }
        Err(e) => {
            warn!("cannot read {}: {e}; starting empty", path.display());
            T::default()
        }
    }
}

/// The whole document hits the disk or none of it does.
fn write_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let payload = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &payload)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// The three documents under one roof.
pub struct Store {
    recordings: JsonDoc<Vec<Recording>>,
    streams: JsonDoc<Vec<SavedStream>>,
    settings: JsonDoc<Settings>,
}

impl Store {
    pub fn new(recordings: PathBuf, streams: PathBuf, settings: PathBuf) -> Self {
        Self {
            recordings: JsonDoc::new(recordings),
            streams: JsonDoc::new(streams),
            settings: JsonDoc::new(settings),
        }
    }

    pub async fn recordings(&self) -> Vec<Recording> {
        self.recordings.read().await
    }

    pub async fn recording(&self, id: &str) -> Result<Recording> {
        self.recordings()
            .await
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::not_found(format!("recording {id}")))
    }

    pub async fn insert_recording(&self, recording: Recording) -> Result<()> {
        self.recordings
            .mutate(Durability::Durable, |all| all.push(recording))
            .await
    }

    /// Mutate one recording in place; `NotFound` when the id is gone.
    pub async fn update_recording<F>(
        &self,
        id: &str,
        durability: Durability,
        mutate: F,
    ) -> Result<Recording>
    where
        F: FnOnce(&mut Recording),
    {
        self.recordings
            .mutate(durability, |all| {
                let rec = all.iter_mut().find(|r| r.id == id)?;
                mutate(&mut *rec);
                Some(rec.clone())
            })
            .await?
            .ok_or_else(|| AppError::not_found(format!("recording {id}")))
    }

    pub async fn remove_recording(&self, id: &str) -> Result<Option<Recording>> {
        self.recordings
            .mutate(Durability::Durable, |all| {
                let idx = all.iter().position(|r| r.id == id)?;
                Some(all.remove(idx))
            })
            .await
    }

    pub async fn streams(&self) -> Vec<SavedStream> {
        self.streams.read().await
    }

    pub async fn stream(&self, id: &str) -> Result<SavedStream> {
        self.streams()
            .await
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| AppError::not_found(format!("stream {id}")))
    }

    pub async fn insert_stream(&self, stream: SavedStream) -> Result<()> {
        self.streams
            .mutate(Durability::Durable, |all| all.push(stream))
            .await
    }

    pub async fn update_stream<F>(&self, id: &str, mutate: F) -> Result<SavedStream>
    where
        F: FnOnce(&mut SavedStream),
    {
        self.streams
            .mutate(Durability::Durable, |all| {
                let s = all.iter_mut().find(|s| s.id == id)?;
                mutate(&mut *s);
                Some(s.clone())
            })
            .await?
            .ok_or_else(|| AppError::not_found(format!("stream {id}")))
    }

    pub async fn remove_stream(&self, id: &str) -> Result<Option<SavedStream>> {
        self.streams
            .mutate(Durability::Durable, |all| {
                let idx = all.iter().position(|s| s.id == id)?;
                Some(all.remove(idx))
            })
            .await
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        patch.validate()?;
        self.settings
            .mutate(Durability::Durable, |s| {
                s.apply(patch);
                s.clone()
            })
            .await
    }
}
