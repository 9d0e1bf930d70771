//! Filesystem capability traits.
//!
//! The loader talks to two stores: the local filesystem where the producer
//! drops extract files and markers, and the staging filesystem backing the
//! external staging table. Both are behind traits so that batches can be
//! exercised against temp directories in tests; the disk-backed
//! implementations below are what the CLI wires in.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem operations used for control files and extract files.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Overwrite `path` with `content`, durably. The write must have reached
    /// disk before this returns; control-file transitions depend on it.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Atomically rename `from` to `to`. The rename is the loader's only
    /// mutual-exclusion point with the producer.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn delete(&self, path: &Path) -> Result<()>;

    async fn file_size(&self, path: &Path) -> Result<u64>;
}

/// Staging filesystem operations, the boundary to the remote store that the
/// external staging table reads from.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn exists(&self, dir: &Path) -> Result<bool>;

    async fn mkdirs(&self, dir: &Path) -> Result<()>;

    async fn is_empty(&self, dir: &Path) -> Result<bool>;

    async fn delete_recursive(&self, dir: &Path) -> Result<()>;

    /// Copy a local file into `dir`, keeping its file name.
    async fn copy_from_local(&self, local: &Path, dir: &Path) -> Result<()>;

    /// Resolve `dir` to the fully-qualified form used in DDL locations.
    async fn resolve_absolute(&self, dir: &Path) -> Result<PathBuf>;
}

/// Disk-backed [`LocalStore`].
#[derive(Debug, Clone, Default)]
pub struct DiskLocalStore;

#[async_trait]
impl LocalStore for DiskLocalStore {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check existence of {}", path.display()))
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(content.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {}", path.display()))?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.with_context(|| {
            format!("Failed to rename {} to {}", from.display(), to.display())
        })
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))
    }

    async fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(meta.len())
    }
}

/// Disk-backed [`StagingStore`]. Stands in for the remote filesystem client
/// when the staging location is a mounted or local path.
#[derive(Debug, Clone, Default)]
pub struct DiskStagingStore;

#[async_trait]
impl StagingStore for DiskStagingStore {
    async fn exists(&self, dir: &Path) -> Result<bool> {
        fs::try_exists(dir)
            .await
            .with_context(|| format!("Failed to check existence of {}", dir.display()))
    }

    async fn mkdirs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create staging directory {}", dir.display()))
    }

    async fn is_empty(&self, dir: &Path) -> Result<bool> {
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list staging directory {}", dir.display()))?;
        Ok(entries.next_entry().await?.is_none())
    }

    async fn delete_recursive(&self, dir: &Path) -> Result<()> {
        fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("Failed to remove staging directory {}", dir.display()))
    }

    async fn copy_from_local(&self, local: &Path, dir: &Path) -> Result<()> {
        let file_name = local
            .file_name()
            .with_context(|| format!("Source path {} has no file name", local.display()))?;
        let destination = dir.join(file_name);
        fs::copy(local, &destination).await.with_context(|| {
            format!(
                "Failed to copy {} to {}",
                local.display(),
                destination.display()
            )
        })?;
        Ok(())
    }

    async fn resolve_absolute(&self, dir: &Path) -> Result<PathBuf> {
        fs::canonicalize(dir)
            .await
            .with_context(|| format!("Failed to resolve {}", dir.display()))
    }
}
