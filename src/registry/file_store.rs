//! JSON-file token store.
//!
//! Keeps the table in memory and rewrites the whole file after every
//! mutation. A mutation is committed to memory only once the file write has
//! succeeded, so a failed write leaves both copies untouched.
//!
//! # Storage structure
//!
//! ```text
//! <token_store_path>          # JSON array of DeviceToken rows (0600 on unix)
//! <token_store_path stem>.tmp # written first, then renamed over the file
//! ```

use std::collections::HashMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::store::{poisoned, TokenFilter, TokenStore};
use crate::error::{DispatchError, Result};
use crate::token::DeviceToken;

/// Token store persisted as a JSON file.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, DeviceToken>>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading existing rows if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| storage(&path, "read", &e))?;
            let list: Vec<DeviceToken> = if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content).map_err(|e| storage(&path, "parse", &e))?
            };
            list.into_iter().map(|row| (row.token.clone(), row)).collect()
        } else {
            HashMap::new()
        };

        log::debug!("[Registry] Opened {} with {} tokens", path.display(), rows.len());

        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, rows: &HashMap<String, DeviceToken>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage(parent, "create", &e))?;
            }
        }

        let mut list: Vec<&DeviceToken> = rows.values().collect();
        list.sort_by(|a, b| a.token.cmp(&b.token));
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| storage(&self.path, "serialize", &e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| storage(&tmp, "write", &e))?;

        #[cfg(unix)]
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
            .map_err(|e| storage(&tmp, "chmod", &e))?;

        fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, "replace", &e))
    }
}

impl TokenStore for FileTokenStore {
    fn replace(&self, rows: &[DeviceToken]) -> Result<()> {
        let mut guard = self.rows.write().map_err(poisoned)?;
        let mut next = guard.clone();
        for row in rows {
            next.insert(row.token.clone(), row.clone());
        }
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn delete(&self, filter: &TokenFilter) -> Result<usize> {
        let mut guard = self.rows.write().map_err(poisoned)?;
        let mut next = guard.clone();
        next.retain(|_, row| !filter.matches(row));
        let removed = guard.len() - next.len();
        if removed > 0 {
            self.persist(&next)?;
            *guard = next;
        }
        Ok(removed)
    }

    fn select(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>> {
        let guard = self.rows.read().map_err(poisoned)?;
        let mut rows: Vec<DeviceToken> = guard
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.token.cmp(&b.token)));
        Ok(rows)
    }
}

fn storage(path: &Path, action: &str, err: &dyn std::fmt::Display) -> DispatchError {
    DispatchError::Storage(format!("failed to {action} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Mode;
    use tempfile::TempDir;

    #[test]
    fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::open(&path).unwrap();
        store
            .replace(&[
                DeviceToken::new("abc", 1, Mode::Production),
                DeviceToken::new("def", 2, Mode::Development),
            ])
            .unwrap();
        assert_eq!(store.delete(&TokenFilter::tokens(["abc"])).unwrap(), 1);
        drop(store);

        let reopened = FileTokenStore::open(&path).unwrap();
        let rows = reopened.select(&TokenFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, "def");
        assert_eq!(rows[0].mode, Mode::Development);
    }

    #[test]
    fn test_failed_write_leaves_rows_untouched() {
        let dir = TempDir::new().unwrap();
        // The store path is a directory, so the final rename fails.
        let path = dir.path().join("occupied");
        fs::create_dir_all(path.join("child")).unwrap();

        let store = FileTokenStore {
            path: path.clone(),
            rows: RwLock::new(HashMap::new()),
        };
        let err = store
            .replace(&[DeviceToken::new("abc", 1, Mode::Production)])
            .unwrap_err();
        assert!(matches!(err, DispatchError::Storage(_)));
        assert_eq!(store.count(&TokenFilter::default()).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::open(&path).unwrap();
        store.replace(&[DeviceToken::new("abc", 1, Mode::Production)]).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
