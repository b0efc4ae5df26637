//! File-system collaborator used for script reads and result persistence.

use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    /// Size in bytes of a regular file.
    async fn file_size(&self, path: &Path) -> std::io::Result<u64>;
}
