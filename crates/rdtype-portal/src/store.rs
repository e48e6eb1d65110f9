//! Small persisted key/value state, used for the portal restore token.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{SESSION_GROUP, STATE_DIR, STATE_FILE};

/// String key/value storage.
pub trait KeyValueStore: Send {
    /// Value stored under `key`, if any.
    fn read(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be persisted.
    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Resolve the default state file path.
///
/// Returns `$XDG_STATE_HOME/rdtype/state.toml`, or the same under the
/// local data dir on platforms without a state dir.
#[must_use]
pub fn default_state_path() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join(STATE_DIR).join(STATE_FILE))
}

type Groups = BTreeMap<String, BTreeMap<String, String>>;

/// TOML state file holding one group of entries.
///
/// ```toml
/// [session]
/// RestoreToken = "..."
/// ```
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    group: String,
}

impl StateFile {
    /// State file at `path` using the `[session]` group.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            group: SESSION_GROUP.to_owned(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every group. A missing, unreadable or malformed file is empty.
    fn load(&self) -> Groups {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "State file not found");
                return Groups::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read state file: {e}");
                return Groups::new();
            }
        };

        toml::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), "Ignoring malformed state file: {e}");
            Groups::new()
        })
    }

    fn save(&self, groups: &Groups) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(groups)?;

        // Write to a temp file, then rename over the old one.
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, contents).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}

impl KeyValueStore for StateFile {
    fn read(&self, key: &str) -> Option<String> {
        self.load().remove(&self.group)?.remove(key)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut groups = self.load();
        groups
            .entry(self.group.clone())
            .or_default()
            .insert(key.to_owned(), value.to_owned());
        self.save(&groups)
    }
}

/// Errors from persisting state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RESTORE_TOKEN_KEY;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateFile::new(dir.path().join("state.toml"));
        assert_eq!(store.read(RESTORE_TOKEN_KEY), None);
    }

    #[test]
    fn token_round_trip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rdtype/state.toml");

        let mut store = StateFile::new(&path);
        store.write(RESTORE_TOKEN_KEY, "abc-123").unwrap();

        let reopened = StateFile::new(&path);
        assert_eq!(reopened.read(RESTORE_TOKEN_KEY).as_deref(), Some("abc-123"));
        assert!(!path.with_extension("toml.tmp").exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[session]"));
        assert!(contents.contains("RestoreToken = \"abc-123\""));
    }

    #[test]
    fn write_keeps_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "[other]\nkey = \"kept\"\n\n[session]\nExtra = \"x\"\n").unwrap();

        let mut store = StateFile::new(&path);
        store.write(RESTORE_TOKEN_KEY, "").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let groups: Groups = toml::from_str(&contents).unwrap();
        assert_eq!(groups["other"]["key"], "kept");
        assert_eq!(groups["session"]["Extra"], "x");
        assert_eq!(groups["session"][RESTORE_TOKEN_KEY], "");
    }

    #[test]
    fn malformed_file_reads_empty_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "this is [not toml").unwrap();

        let mut store = StateFile::new(&path);
        assert_eq!(store.read(RESTORE_TOKEN_KEY), None);

        store.write(RESTORE_TOKEN_KEY, "fresh").unwrap();
        assert_eq!(store.read(RESTORE_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[test]
    fn default_path_ends_with_state_file() {
        if let Some(path) = default_state_path() {
            assert!(path.ends_with("rdtype/state.toml"));
        }
    }
}
