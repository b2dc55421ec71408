//! Key-value persistence for the bits of state that survive a restart.
//!
//! Only the authenticated user's profile snapshot is persisted; everything else is
//! rebuilt from the network.

use eyre::Context;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = eyre::Result<T>> + Send + 'a>>;

/// Key under which the current user's profile snapshot is stored.
pub const PROFILE_KEY: &str = "user";

pub trait ProfileStorage: Send + Sync + fmt::Debug {
    fn load<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;
    fn store<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()>;
    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ProfileStorage for FileStorage {
    fn load<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move {
            let path = self.path(key);
            if !tokio::fs::try_exists(&path)
                .await
                .with_context(|| format!("check for {}", path.display()))?
            {
                return Ok(None);
            }
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read {}", path.display()))?;
            Ok(Some(contents))
        })
    }

    fn store<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("create state directory {}", self.dir.display()))?;
            let path = self.path(key);
            tokio::fs::write(&path, value)
                .await
                .with_context(|| format!("write {}", path.display()))
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.path(key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
            }
        })
    }
}

/// Storage that forgets everything when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStorage for MemoryStorage {
    fn load<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn store<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }
}
