use certacl::authz::AuthorizationManager;
use certacl::store::{ConfigStore, FileBackend, StoreBackend, StoreError, SubStore};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File-backed configuration store in a temporary directory
pub struct TestStore {
    dir: TempDir,
    path: PathBuf,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("store.json");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Open the store as it is currently on disk
    pub fn open(&self) -> ConfigStore {
        ConfigStore::open(FileBackend::new(&self.path)).expect("Failed to open test store")
    }

    /// Manager over the current on-disk contents, without fsync
    pub fn manager(&self) -> AuthorizationManager {
        AuthorizationManager::open(self.open())
            .expect("Failed to load ACL configuration")
            .with_sync_commits(false)
    }
}

/// Backend that loads an empty tree and refuses every save
#[derive(Debug, Default)]
pub struct FailingBackend;

impl StoreBackend for FailingBackend {
    fn load(&self) -> Result<SubStore, StoreError> {
        Ok(SubStore::default())
    }

    fn save(&mut self, _root: &SubStore, _sync: bool) -> Result<(), StoreError> {
        Err(StoreError::Rejected("store is read-only".into()))
    }
}
