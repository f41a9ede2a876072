use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::transport::{LocalPage, LocalPageStore};

const DEFAULT_MAX_PER_KEY: usize = 150;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PageData {
    // cache key -> last page stored for it
    pages: HashMap<String, LocalPage>,
}

/// Local page store backed by a single JSON file, or by memory only.
#[derive(Debug, Clone)]
pub struct JsonPageStore {
    inner: Arc<RwLock<PageData>>,
    path: Option<PathBuf>,
    max_per_key: usize,
}

impl JsonPageStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PageData::default())),
            path: None,
            max_per_key: DEFAULT_MAX_PER_KEY,
        }
    }

    /// Loads the store from `path`, falling back to `<path>.tmp` when the
    /// main file is corrupted and to an empty store when neither parses.
    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PageData>(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "failed to parse page store, trying tmp fallback"
                    );
                    match tokio::fs::read(tmp_path(&path)).await {
                        Ok(tmp_bytes) => serde_json::from_slice(&tmp_bytes).unwrap_or_default(),
                        Err(_) => PageData::default(),
                    }
                }
            },
            Err(_) => PageData::default(),
        };
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
            max_per_key: DEFAULT_MAX_PER_KEY,
        }
    }

    pub fn with_max_per_key(mut self, max_per_key: usize) -> Self {
        self.max_per_key = max_per_key.max(1);
        self
    }

    pub async fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner.pages.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn persist(&self) -> Result<(), FeedError> {
        let Some(path) = &self.path else {
            debug!("page store is in-memory only; skipping persist");
            return Ok(());
        };
        let bytes = {
            let inner = self.inner.read().await;
            serde_json::to_vec_pretty(&*inner)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // atomic write
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

#[async_trait]
impl LocalPageStore for JsonPageStore {
    async fn get_local(&self, key: &str) -> Result<Option<LocalPage>, FeedError> {
        let inner = self.inner.read().await;
        Ok(inner.pages.get(key).cloned())
    }

    async fn put_local(&self, key: &str, mut page: LocalPage) -> Result<(), FeedError> {
        page.entities.truncate(self.max_per_key);
        {
            let mut inner = self.inner.write().await;
            inner.pages.insert(key.to_owned(), page);
        }
        self.persist().await
    }

    async fn remove_local(&self, key: &str) -> Result<(), FeedError> {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.pages.remove(key).is_some()
        };
        if removed {
            self.persist().await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entity::RawEntity;

    fn page(n: usize) -> LocalPage {
        LocalPage {
            entities: (0..n).map(|i| RawEntity::new(format!("urn:{i}"))).collect(),
            next_cursor: None,
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_truncates_to_cap() {
        let store = JsonPageStore::in_memory().with_max_per_key(3);
        store.put_local("feed", page(5)).await.unwrap();
        let stored = store.get_local("feed").await.unwrap().unwrap();
        assert_eq!(stored.entities.len(), 3);
        assert_eq!(stored.entities[0].urn, "urn:0");
    }

    #[tokio::test]
    async fn remove_missing_key_is_ok() {
        let store = JsonPageStore::in_memory();
        store.remove_local("nothing").await.unwrap();
        assert!(store.get_local("nothing").await.unwrap().is_none());
    }
}
