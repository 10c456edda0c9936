//! Credential storage for OAuth tokens
//!
//! Manages a JSON file mapping provider ids to tokens:
//!
//! ```json
//! {"tokens": {"fitbit": {"access_token": "...", "refresh_token": "...",
//!                         "token_type": "Bearer", "expiry": "..."}}}
//! ```
//!
//! Every write rewrites the whole document via temp-file + rename, so the
//! file is always a complete snapshot. A single tokio Mutex guards both the
//! in-memory map and the act of writing it out, which serializes concurrent
//! refreshes arriving from different outbound calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::Token;

/// On-disk document shape.
#[derive(Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    tokens: HashMap<String, Token>,
}

#[derive(Serialize)]
struct CredentialFileRef<'a> {
    tokens: &'a HashMap<String, Token>,
}

/// Thread-safe credential file manager.
///
/// Construct once per process and share it behind an `Arc`.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Token>>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// A missing file yields an empty store; the file is first created by
    /// the first `set`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tokens = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let file: CredentialFile = serde_json::from_str(&contents).map_err(|e| {
                    Error::StoreDecode(format!("parsing {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), providers = file.tokens.len(), "loaded credentials");
                file.tokens
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "credential file not found, starting with empty store"
                );
                HashMap::new()
            }
            Err(e) => {
                return Err(Error::StoreRead(format!("reading {}: {e}", path.display())));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(tokens),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a clone of the token stored for `provider`. Never touches the disk.
    pub async fn get(&self, provider: &str) -> Option<Token> {
        let state = self.state.lock().await;
        state.get(provider).cloned()
    }

    /// Add or replace the token for `provider` and persist the whole store.
    ///
    /// If persisting fails the in-memory update is kept, so readers in this
    /// process still see the new token, and `StoreWrite` is returned.
    pub async fn set(&self, provider: &str, token: Token) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(provider.to_string(), token);
        debug!(provider, "stored token");
        write_atomic(&self.path, &state).await
    }

    /// Remove the token for `provider` and persist.
    ///
    /// Returns the removed token if it existed.
    pub async fn remove(&self, provider: &str) -> Result<Option<Token>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(provider);
        if removed.is_some() {
            debug!(provider, "removed token");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// All provider ids with a stored token, sorted.
    pub async fn provider_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of stored tokens.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the full document atomically.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over the target. The file is created with 0600 permissions (owner
/// read/write only) since it holds long-lived refresh tokens.
async fn write_atomic(path: &Path, tokens: &HashMap<String, Token>) -> Result<()> {
    let json = serde_json::to_string_pretty(&CredentialFileRef { tokens })
        .map_err(|e| Error::StoreWrite(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::StoreWrite("credential path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("credentials");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&tmp_path)
        .await
        .map_err(|e| Error::StoreWrite(format!("creating temp credential file: {e}")))?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| Error::StoreWrite(format!("writing temp credential file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::StoreWrite(format!("syncing temp credential file: {e}")))?;
    drop(file);

    // A stale temp file from a crashed run keeps its old mode; force 0600.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::StoreWrite(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::StoreWrite(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn test_token(suffix: &str) -> Token {
        Token {
            access_token: format!("at_{suffix}"),
            token_type: "Bearer".into(),
            refresh_token: Some(format!("rt_{suffix}")),
            expiry: Some(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn roundtrip_set_get_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set("fitbit", test_token("1")).await.unwrap();
        assert_eq!(store.get("fitbit").await, Some(test_token("1")));

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.get("fitbit").await, Some(test_token("1")));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(!path.exists(), "loading must not create the file");
    }

    #[tokio::test]
    async fn existing_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(
            &path,
            r#"{"tokens":{"fitbit":
                {"access_token":"A","refresh_token":"R","token_type":"Bearer"}}}"#,
        )
        .await
        .unwrap();

        let store = CredentialStore::load(path).await.unwrap();
        let token = store.get("fitbit").await.unwrap();
        assert_eq!(token.access_token, "A");
        assert_eq!(token.refresh_token.as_deref(), Some("R"));
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expiry.is_none());
        assert!(store.get("strava").await.is_none());
    }

    #[tokio::test]
    async fn provider_ids_are_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        store.set("fitbit", test_token("1")).await.unwrap();
        assert!(store.get("Fitbit").await.is_none());
    }

    #[tokio::test]
    async fn malformed_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = CredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::StoreDecode(_))));
    }

    #[tokio::test]
    async fn persisted_document_has_tokens_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set("strava", test_token("s")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["tokens"]["strava"]["access_token"], "at_s");
        assert_eq!(json["tokens"]["strava"]["expiry"], "2030-01-01T12:00:00Z");
    }

    #[tokio::test]
    async fn write_failure_keeps_in_memory_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("credentials.json");

        let store = CredentialStore::load(path).await.unwrap();
        let result = store.set("fitbit", test_token("1")).await;

        assert!(matches!(result, Err(Error::StoreWrite(_))));
        assert_eq!(store.get("fitbit").await, Some(test_token("1")));
    }

    #[tokio::test]
    async fn remove_and_provider_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set("strava", test_token("s")).await.unwrap();
        store.set("fitbit", test_token("f")).await.unwrap();
        assert_eq!(store.provider_ids().await, vec!["fitbit", "strava"]);

        let removed = store.remove("fitbit").await.unwrap();
        assert!(removed.is_some());
        assert!(store.remove("fitbit").await.unwrap().is_none());

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.provider_ids().await, vec!["strava"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set("fitbit", test_token("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_sets_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(&format!("provider-{i}"), test_token(&i.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.len().await, 10);
        for i in 0..10 {
            let token = reloaded.get(&format!("provider-{i}")).await.unwrap();
            assert_eq!(token.access_token, format!("at_{i}"));
        }
    }
}
