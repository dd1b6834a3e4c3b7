//! File storage for raw messages

use async_trait::async_trait;
use ingress_common::config::StorageConfig;
use ingress_common::{Error, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Flat file store addressed by relative, `/`-separated paths
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write a file. A reader never observes a partially written file.
    async fn store(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Names of the visible files directly below `dir`, sorted.
    /// A missing directory lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// Storage rooted at a local directory
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Create the root directory if needed and use it
    pub fn from_path(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            Error::Storage(format!(
                "Cannot create storage root {}: {}",
                root.display(),
                e
            ))
        })?;

        info!(root = %root.display(), "Using local message storage");

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Map a relative path below the root; anything that could escape is refused
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0;

        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Storage(format!(
                        "Refusing path outside storage root: {:?}",
                        path
                    )));
                }
            }
        }

        if depth == 0 {
            return Err(Error::Storage("Empty storage path".to_string()));
        }
        Ok(resolved)
    }
}

fn storage_error(action: &str, path: &Path, e: io::Error) -> Error {
    Error::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            return Err(Error::Storage(format!("Not a file path: {:?}", path)));
        };

        fs::create_dir_all(dir)
            .await
            .map_err(|e| storage_error("create directory", dir, e))?;

        // Hidden until renamed into place
        let staging = dir.join(format!(".{}.tmp", name.to_string_lossy()));
        fs::write(&staging, data)
            .await
            .map_err(|e| storage_error("write", &staging, e))?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(storage_error("move into place", &target, e));
        }

        debug!(path = %path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let source = self.resolve(path)?;
        fs::read(&source)
            .await
            .map_err(|e| storage_error("read", &source, e))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let dir = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", &dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Pick the storage backend named in configuration
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn FileStorage>> {
    match config.backend.as_str() {
        "fs" => Ok(Arc::new(LocalStorage::new(config)?)),
        other => Err(Error::Config(format!(
            "Unsupported storage backend: {}",
            other
        ))),
    }
}
