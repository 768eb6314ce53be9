//! Hierarchical key/value configuration store.
//!
//! The store is a tree of named sub-stores, each holding string values. All
//! edits land in a pending tree; `commit` hands the whole tree to a backend and
//! only then promotes it to the committed tree. `rollback` throws pending
//! edits away.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Failed to read configuration store `{path}`")]
    #[diagnostic(code(certacl::store::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration store `{path}`")]
    #[diagnostic(
        code(certacl::store::write),
        help("Check that the store directory exists and is writable")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration store `{path}` is not valid JSON")]
    #[diagnostic(code(certacl::store::malformed))]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Commit rejected by backend: {0}")]
    #[diagnostic(code(certacl::store::rejected))]
    Rejected(String),
}

/// One node of the store tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStore {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    values: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    children: IndexMap<String, SubStore>,
}

impl SubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove_string(&mut self, key: &str) -> Option<String> {
        self.values.shift_remove(key)
    }

    pub fn sub_store(&self, name: &str) -> Option<&SubStore> {
        self.children.get(name)
    }

    pub fn sub_store_mut(&mut self, name: &str) -> Option<&mut SubStore> {
        self.children.get_mut(name)
    }

    /// Returns the named child, creating an empty one if needed.
    pub fn make_sub_store(&mut self, name: impl Into<String>) -> &mut SubStore {
        self.children.entry(name.into()).or_default()
    }

    /// Removes the named child. Sibling order is preserved.
    pub fn remove_sub_store(&mut self, name: &str) -> bool {
        self.children.shift_remove(name).is_some()
    }

    /// Children in insertion order.
    pub fn sub_stores(&self) -> impl Iterator<Item = (&str, &SubStore)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }
}

/// Where committed trees go.
pub trait StoreBackend: Send + fmt::Debug {
    fn load(&self) -> Result<SubStore, StoreError>;

    /// Persist the complete tree. Must either store all of it or fail.
    fn save(&mut self, root: &SubStore, sync: bool) -> Result<(), StoreError>;
}

/// Persists the tree as a pretty-printed JSON document.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash never leaves a half-written store behind.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> Result<SubStore, StoreError> {
        if !self.path.exists() {
            return Ok(SubStore::default());
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(SubStore::default());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Malformed {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&mut self, root: &SubStore, sync: bool) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.write_err(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.write_err(e))?;
        let body = serde_json::to_vec_pretty(root).map_err(|source| StoreError::Malformed {
            path: self.path.display().to_string(),
            source,
        })?;
        tmp.write_all(&body).map_err(|e| self.write_err(e))?;
        tmp.write_all(b"\n").map_err(|e| self.write_err(e))?;
        if sync {
            tmp.as_file().sync_all().map_err(|e| self.write_err(e))?;
        }
        tmp.persist(&self.path).map_err(|e| self.write_err(e.error))?;
        Ok(())
    }
}

/// Keeps the last committed tree in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    saved: SubStore,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(saved: SubStore) -> Self {
        Self { saved }
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<SubStore, StoreError> {
        Ok(self.saved.clone())
    }

    fn save(&mut self, root: &SubStore, _sync: bool) -> Result<(), StoreError> {
        self.saved = root.clone();
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    committed: SubStore,
    pending: SubStore,
    backend: Box<dyn StoreBackend>,
}

impl ConfigStore {
    /// Loads the committed tree from `backend`.
    pub fn open<B: StoreBackend + 'static>(backend: B) -> Result<Self, StoreError> {
        let committed = backend.load()?;
        Ok(Self {
            pending: committed.clone(),
            committed,
            backend: Box::new(backend),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            committed: SubStore::default(),
            pending: SubStore::default(),
            backend: Box::new(MemoryBackend::new()),
        }
    }

    /// The pending tree, including uncommitted edits.
    pub fn root(&self) -> &SubStore {
        &self.pending
    }

    pub fn root_mut(&mut self) -> &mut SubStore {
        &mut self.pending
    }

    pub fn get_sub_store(&self, path: &[&str]) -> Option<&SubStore> {
        path.iter()
            .try_fold(&self.pending, |node, name| node.sub_store(name))
    }

    /// Walks `path`, creating missing sub-stores on the way.
    pub fn make_sub_store(&mut self, path: &[&str]) -> &mut SubStore {
        path.iter()
            .fold(&mut self.pending, |node, name| node.make_sub_store(*name))
    }

    pub fn remove_sub_store(&mut self, path: &[&str]) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut node = &mut self.pending;
        for name in parents {
            match node.sub_store_mut(name) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.remove_sub_store(last)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending != self.committed
    }

    /// Persists the pending tree. On error nothing is promoted and the
    /// pending edits are still in place; callers decide whether to
    /// [`rollback`](Self::rollback).
    pub fn commit(&mut self, sync: bool) -> Result<(), StoreError> {
        self.backend.save(&self.pending, sync)?;
        self.committed = self.pending.clone();
        Ok(())
    }

    pub fn rollback(&mut self) {
        self.pending = self.committed.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RejectingBackend;

    impl StoreBackend for RejectingBackend {
        fn load(&self) -> Result<SubStore, StoreError> {
            Ok(SubStore::default())
        }

        fn save(&mut self, _root: &SubStore, _sync: bool) -> Result<(), StoreError> {
            Err(StoreError::Rejected("disk full".into()))
        }
    }

    #[test]
    fn test_nested_sub_stores() {
        let mut store = ConfigStore::in_memory();
        store
            .make_sub_store(&["authz", "acls", "certServer.ca.certificate"])
            .put_string("rights", "read,modify");

        let node = store
            .get_sub_store(&["authz", "acls", "certServer.ca.certificate"])
            .unwrap();
        assert_eq!(node.get_string("rights"), Some("read,modify"));
        assert!(store.get_sub_store(&["authz", "evaluators"]).is_none());
    }

    #[test]
    fn test_remove_sub_store_keeps_sibling_order() {
        let mut store = ConfigStore::in_memory();
        let acls = store.make_sub_store(&["acls"]);
        acls.make_sub_store("a");
        acls.make_sub_store("b");
        acls.make_sub_store("c");

        assert!(store.remove_sub_store(&["acls", "b"]));
        assert!(!store.remove_sub_store(&["acls", "b"]));
        assert!(!store.remove_sub_store(&["missing", "b"]));

        let names: Vec<_> = store
            .get_sub_store(&["acls"])
            .unwrap()
            .sub_stores()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_rollback_discards_pending() {
        let mut store = ConfigStore::in_memory();
        store.root_mut().put_string("kept", "1");
        store.commit(false).unwrap();

        store.root_mut().put_string("dropped", "2");
        assert!(store.has_pending_changes());
        store.rollback();

        assert!(!store.has_pending_changes());
        assert_eq!(store.root().get_string("kept"), Some("1"));
        assert_eq!(store.root().get_string("dropped"), None);
    }

    #[test]
    fn test_failed_commit_does_not_promote() {
        let mut store = ConfigStore::open(RejectingBackend).unwrap();
        store.root_mut().put_string("k", "v");
        let err = store.commit(true).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.has_pending_changes());

        store.rollback();
        assert!(store.root().is_empty());
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = ConfigStore::open(FileBackend::new(&path)).unwrap();
        assert!(store.root().is_empty());
        let acl = store.make_sub_store(&["authz", "acls", "certServer.acl.configuration"]);
        acl.put_string("rights", "read,modify");
        acl.put_string("description", "ACL configuration");
        store.commit(true).unwrap();

        let reopened = ConfigStore::open(FileBackend::new(&path)).unwrap();
        assert_eq!(reopened.root(), store.root());
        assert!(!reopened.has_pending_changes());
    }

    #[test]
    fn test_file_backend_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::open(FileBackend::new(&path)).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }
}
