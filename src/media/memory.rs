use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{validate_upload, MediaError, MediaStore, StoredAsset};

/// In-process media store. Backs local development and the test suite;
/// `fail_removals` lets tests exercise the upstream-failure path.
#[derive(Default)]
pub struct InMemoryMediaStore {
    assets: Mutex<HashMap<String, Vec<u8>>>,
    fail_removals: AtomicBool,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.assets.lock().unwrap().contains_key(public_id)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn store(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        folder: &str,
        _transform: bool,
    ) -> Result<StoredAsset, MediaError> {
        validate_upload(&bytes, mime)?;

        let public_id = format!("{}/{}", folder, uuid::Uuid::now_v7());
        let url = format!("memory://{}", public_id);
        self.assets.lock().unwrap().insert(public_id.clone(), bytes);

        Ok(StoredAsset { public_id, url })
    }

    async fn remove(&self, public_id: &str) -> Result<(), MediaError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("simulated outage".into()));
        }
        // Removing an absent asset is a success (idempotent contract)
        self.assets.lock().unwrap().remove(public_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_remove_roundtrip() {
        let store = InMemoryMediaStore::new();
        let asset = store
            .store(b"\x89PNG".to_vec(), "image/png", "posts", false)
            .await
            .unwrap();
        assert!(store.contains(&asset.public_id));
        assert!(asset.public_id.starts_with("posts/"));

        store.remove(&asset.public_id).await.unwrap();
        assert!(!store.contains(&asset.public_id));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryMediaStore::new();
        store.remove("posts/does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn removal_failure_can_be_simulated() {
        let store = InMemoryMediaStore::new();
        store.set_fail_removals(true);
        let err = store.remove("posts/x").await.unwrap_err();
        assert!(matches!(err, MediaError::Transport(_)));
    }
}
