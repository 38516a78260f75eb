//! Durable storage for rewards whose recipient was unreachable at
//! settlement time.

use std::{
    collections::HashMap,
    io,
    path::{
        Path,
        PathBuf,
    },
};

use eyre::WrapErr as _;
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// A serialized reward waiting for its recipient to reconnect.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StoredReward {
    pub description: String,
    pub payload: serde_json::Value,
}

/// A mapping of recipient identity to pending reward, mirrored in memory
/// and flushed to disk before any mutation is acknowledged.
///
/// Losing a write here means a reward disappears with no recipient, so the
/// in-memory mirror is only updated after the flush succeeded. A failed
/// flush leaves both the mirror and the file in their previous state.
#[derive(Debug)]
pub struct OfflineStore {
    path: PathBuf,
    entries: HashMap<Uuid, StoredReward>,
}

impl OfflineStore {
    /// Opens the store at `path`, loading all unresolved entries. A missing
    /// file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).wrap_err_with(|| {
                format!(
                    "offline store file `{}` holds malformed json",
                    path.display()
                )
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("failed reading offline store file `{}`", path.display())
                });
            }
        };
        Ok(Self {
            path,
            entries,
        })
    }

    /// Records `reward` as pending for `recipient`, replacing any previous
    /// entry. Returns only after the write hit disk.
    pub fn put(&mut self, recipient: Uuid, reward: StoredReward) -> eyre::Result<()> {
        let mut next = self.entries.clone();
        next.insert(recipient, reward);
        self.flush(&next)
            .wrap_err("failed persisting offline store after insert")?;
        self.entries = next;
        Ok(())
    }

    /// Removes and returns the pending reward for `recipient`, if any.
    /// The removal is durable once this returns.
    pub fn claim(&mut self, recipient: &Uuid) -> eyre::Result<Option<StoredReward>> {
        if !self.entries.contains_key(recipient) {
            return Ok(None);
        }
        let mut next = self.entries.clone();
        let claimed = next.remove(recipient);
        self.flush(&next)
            .wrap_err("failed persisting offline store after removal")?;
        self.entries = next;
        Ok(claimed)
    }

    pub fn get(&self, recipient: &Uuid) -> Option<&StoredReward> {
        self.entries.get(recipient)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self, entries: &HashMap<Uuid, StoredReward>) -> eyre::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(dir)
            .wrap_err("failed creating temp file for offline store flush")?;
        serde_json::to_writer_pretty(tmp.as_file(), entries)
            .wrap_err("failed serializing offline store entries")?;
        tmp.as_file()
            .sync_all()
            .wrap_err("failed syncing offline store temp file")?;
        tmp.persist(&self.path).wrap_err_with(|| {
            format!(
                "failed moving offline store temp file into place at `{}`",
                self.path.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::{
        OfflineStore,
        StoredReward,
    };

    fn reward(label: &str) -> StoredReward {
        StoredReward {
            description: label.to_string(),
            payload: json!({ "label": label }),
        }
    }

    #[test]
    fn missing_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineStore::load(dir.path().join("rewards.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn entries_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        let recipient = Uuid::new_v4();

        let mut store = OfflineStore::load(&path).unwrap();
        store.put(recipient, reward("emerald sword")).unwrap();

        let reloaded = OfflineStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(&recipient), Some(&reward("emerald sword")));
    }

    #[test]
    fn claim_removes_the_entry_durably() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        let recipient = Uuid::new_v4();

        let mut store = OfflineStore::load(&path).unwrap();
        store.put(recipient, reward("beacon")).unwrap();

        let claimed = store.claim(&recipient).unwrap();
        assert_eq!(claimed, Some(reward("beacon")));
        assert!(store.claim(&recipient).unwrap().is_none());

        let reloaded = OfflineStore::load(&path).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn put_replaces_a_previous_entry_for_the_same_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        let recipient = Uuid::new_v4();

        let mut store = OfflineStore::load(&path).unwrap();
        store.put(recipient, reward("old")).unwrap();
        store.put(recipient, reward("new")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&recipient), Some(&reward("new")));
    }

    #[test]
    fn malformed_file_is_reported_not_wiped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        std::fs::write(&path, b"not json").unwrap();

        OfflineStore::load(&path).unwrap_err();
        assert_eq!(std::fs::read(&path).unwrap(), b"not json");
    }
}
