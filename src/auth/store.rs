use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Result, TrackerError};

/// OAuth token set as persisted on disk.
///
/// Field names follow the provider's token response, so the file is
/// interchangeable with what other Google OAuth tooling writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Access token expiry as Unix epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

/// On-disk store for the token set.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token set, or `None` if there is nothing usable.
    ///
    /// A missing file is the normal first-run case. A file that does not
    /// parse is treated the same way, with a warning, so a corrupt token
    /// file falls through to the interactive flow instead of wedging
    /// startup.
    pub async fn load(&self) -> Result<Option<TokenSet>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<TokenSet>(&content) {
                Ok(tokens) => Ok(Some(tokens)),
                Err(e) => {
                    warn!(
                        "Ignoring malformed token file '{}': {}",
                        self.path.display(),
                        e
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::TokenLoad {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Save the token set to a JSON file atomically.
    pub async fn save(&self, tokens: &TokenSet) -> Result<()> {
        let content = serde_json::to_string_pretty(tokens)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = PathBuf::from(format!("{}.tmp", self.path.display()));
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| TrackerError::TokenSave {
                path: self.path.display().to_string(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| TrackerError::TokenSave {
                path: self.path.display().to_string(),
                source: e,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> TokenStore {
        let path = std::env::temp_dir().join(format!(
            "presence-tracker-{}-{}.json",
            name,
            std::process::id()
        ));
        TokenStore::new(path)
    }

    #[test]
    fn test_token_set_wire_shape() {
        let tokens: TokenSet =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"b"}"#).unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("a"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("b"));
        assert!(tokens.scope.is_none());
        assert!(tokens.expiry_date.is_none());

        let json = serde_json::to_string(&TokenSet {
            access_token: Some("a".to_string()),
            refresh_token: None,
            scope: None,
            token_type: Some("Bearer".to_string()),
            expiry_date: Some(1700000000000),
        })
        .unwrap();
        assert!(json.contains(r#""access_token":"a""#));
        assert!(json.contains(r#""expiry_date":1700000000000"#));
        // Absent fields stay out of the file entirely.
        assert!(!json.contains("refresh_token"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let store = temp_store("missing");
        let _ = tokio::fs::remove_file(store.path()).await;
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_file_is_none() {
        let store = temp_store("malformed");
        tokio::fs::write(store.path(), "{not json at all")
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());
        let _ = tokio::fs::remove_file(store.path()).await;
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let store = temp_store("roundtrip");
        let tokens = TokenSet {
            access_token: Some("access".to_string()),
            refresh_token: Some("refresh".to_string()),
            scope: Some("https://www.googleapis.com/auth/spreadsheets".to_string()),
            token_type: Some("Bearer".to_string()),
            expiry_date: Some(1700000000000),
        };

        store.save(&tokens).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("access"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.expiry_date, Some(1700000000000));

        let _ = tokio::fs::remove_file(store.path()).await;
    }
}
