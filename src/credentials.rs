//! Per-adapter credential records.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::store::JsonDirStore;

/// Username, password and the provider's opaque token list.
///
/// `auth_tokens` is either empty or the full list an adapter returned from
/// its last login/refresh. Which slot means what is up to the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub auth_tokens: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn has_tokens(&self) -> bool {
        !self.auth_tokens.is_empty()
    }
}

/// Credential records for all adapters, optionally backed by one JSON file
/// per adapter.
pub struct CredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
    backing: Option<JsonDirStore<CredentialRecord>>,
}

impl CredentialStore {
    /// Store persisting to `<dir>/<adapter>.json`.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            backing: Some(JsonDirStore::new(dir)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            backing: None,
        }
    }

    /// Current record for `adapter_id`, empty if none was ever stored.
    ///
    /// A record that fails to load is logged and treated as empty, which
    /// makes the next token-requiring call log in again.
    pub async fn get(&self, adapter_id: &str) -> CredentialRecord {
        if let Some(record) = self.records.read().await.get(adapter_id) {
            return record.clone();
        }

        let loaded = match &self.backing {
            Some(store) => match store.load(adapter_id).await {
                Ok(record) => record.unwrap_or_default(),
                Err(e) => {
                    warn!("Ignoring unreadable credentials for {adapter_id}: {e}");
                    CredentialRecord::default()
                }
            },
            None => CredentialRecord::default(),
        };

        self.records
            .write()
            .await
            .entry(adapter_id.to_string())
            .or_insert(loaded)
            .clone()
    }

    /// Replace the whole record.
    pub async fn put(&self, adapter_id: &str, record: CredentialRecord) -> Result<()> {
        if let Some(store) = &self.backing {
            store.save(adapter_id, &record).await?;
        }
        self.records
            .write()
            .await
            .insert(adapter_id.to_string(), record);
        Ok(())
    }

    /// Replace the token list and stamp `last_updated`, keeping username and
    /// password.
    pub async fn set_tokens(
        &self,
        adapter_id: &str,
        tokens: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<CredentialRecord> {
        let mut record = self.get(adapter_id).await;
        record.auth_tokens = tokens;
        record.last_updated = Some(now);
        self.put(adapter_id, record.clone()).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_adapter_has_empty_record() {
        let store = CredentialStore::in_memory();
        let record = store.get("alpha").await;
        assert_eq!(record, CredentialRecord::default());
        assert!(!record.has_tokens());
    }

    #[tokio::test]
    async fn set_tokens_preserves_login() {
        let store = CredentialStore::in_memory();
        store
            .put(
                "alpha",
                CredentialRecord {
                    username: "user".into(),
                    password: "pass".into(),
                    ..CredentialRecord::default()
                },
            )
            .await
            .unwrap();

        let now = Utc::now();
        let record = store
            .set_tokens("alpha", vec!["t1".into(), "t2".into()], now)
            .await
            .unwrap();
        assert_eq!(record.username, "user");
        assert_eq!(record.auth_tokens, vec!["t1", "t2"]);
        assert_eq!(record.last_updated, Some(now));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CredentialStore::open(dir.path());
            store
                .set_tokens("alpha", vec!["cookie".into()], Utc::now())
                .await
                .unwrap();
        }
        let store = CredentialStore::open(dir.path());
        assert_eq!(store.get("alpha").await.auth_tokens, vec!["cookie"]);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.json"), "[").unwrap();
        let store = CredentialStore::open(dir.path());
        assert!(!store.get("alpha").await.has_tokens());
    }
}
