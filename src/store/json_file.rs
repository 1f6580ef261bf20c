//! JSON file backend for the conversation store.
//!
//! Layout: `{ "<sender>": [ { "role": "user", "content": [ {"kind": "text", "text": ".."} ] } ] }`.
//! Saves go to a sibling temp file which is fsynced and then renamed over
//! the target, so a crash mid-write leaves the previous state intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::pipeline::types::ConversationMap;
use crate::store::ConversationStore;

/// Conversation store persisted as one pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "conversations".into());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }

    async fn write_then_rename(&self, tmp: &Path, json: &[u8]) -> Result<(), StoreError> {
        let mut file = fs::File::create(tmp).await?;
        file.write_all(json).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self) -> Result<ConversationMap, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No conversation store yet");
                return Ok(ConversationMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        // Freshly created, never written.
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ConversationMap::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, conversations: &ConversationMap) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(conversations)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        if let Err(e) = self.write_then_rename(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        debug!(
            path = %self.path.display(),
            senders = conversations.len(),
            "Saved conversation store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ChatTurn, ContentBlock};

    fn sample() -> ConversationMap {
        let mut map = ConversationMap::new();
        map.insert(
            "a@x.com".into(),
            vec![
                ChatTurn::user(vec![
                    ContentBlock::text("Hi"),
                    ContentBlock::text("[Attached File: n.txt]\nnotes"),
                    ContentBlock::image("data:image/png;base64,AQ=="),
                ]),
                ChatTurn::assistant("Hello!"),
            ],
        );
        map.insert("b@y.org".into(), vec![ChatTurn::user(vec![ContentBlock::text("Yo")])]);
        map
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(JsonFileStore::new(path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"a@x.com": [ {"role": "user""#).unwrap();
        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        // The corrupt file is left alone for inspection.
        assert!(path.exists());
    }

    #[tokio::test]
    async fn wrong_shape_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"a@x.com": "not a list"}"#).unwrap();
        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        let map = sample();
        store.save(&map).await.unwrap();
        assert_eq!(store.load().await.unwrap(), map);
    }

    #[tokio::test]
    async fn resave_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(&path);
        store.save(&sample()).await.unwrap();

        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();
        let first = std::fs::read(&path).unwrap();

        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn save_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        store.save(&sample()).await.unwrap();
        store.save(&ConversationMap::new()).await.unwrap();

        assert!(store.load().await.unwrap().is_empty());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/store.json"));
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), sample());
    }

    #[tokio::test]
    async fn persisted_layout_is_tagged_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));
        store.save(&sample()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["a@x.com"][0]["role"], "user");
        assert_eq!(raw["a@x.com"][0]["content"][0]["kind"], "text");
        assert_eq!(raw["a@x.com"][0]["content"][2]["kind"], "image");
        assert_eq!(raw["a@x.com"][0]["content"][2]["uri"], "data:image/png;base64,AQ==");
        assert_eq!(raw["a@x.com"][1]["role"], "assistant");
    }
}
