//! File system storage management
//!
//! The transfer and command layers only see the [`FtpFile`] and [`FtpDirectory`]
//! traits; [`filesystem`] provides the local-disk implementation.

pub mod filesystem;
pub mod operations;
pub mod permissions;
pub mod validation;

use async_trait::async_trait;

use crate::error::StorageError;

pub use filesystem::{LocalDirectory, LocalFile};
pub use validation::{resolve_virtual_path, virtual_to_real_path};

/// How a file is opened for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate; a non-zero offset overwrites from that position
    Write,
    Append,
}

/// A file taking part in a transfer, moved block by block.
#[async_trait]
pub trait FtpFile: Send + Sync {
    /// Virtual path, as shown to the client
    fn path(&self) -> &str;

    /// Next block, or `None` at end of file
    async fn read_block(&mut self, block_size: usize) -> Result<Option<Vec<u8>>, StorageError>;

    async fn write_block(&mut self, block: &[u8]) -> Result<(), StorageError>;

    async fn exists(&self) -> bool;

    async fn length(&self) -> Result<u64, StorageError>;

    fn is_in_reading(&self) -> bool;

    fn is_in_writing(&self) -> bool;

    /// Flush and release the handle after a complete transfer
    async fn close(&mut self) -> Result<(), StorageError>;

    /// Release the handle after a failed or aborted transfer
    async fn abort(&mut self);
}

/// The per-session view of the file tree, rooted at the user's business root.
#[async_trait]
pub trait FtpDirectory: Send + Sync {
    /// Post-identification setup: root the view at `root` and reset the cwd
    async fn initialize(&mut self, root: &str) -> Result<(), StorageError>;

    fn pwd(&self) -> String;

    async fn change_directory(&mut self, path: &str) -> Result<String, StorageError>;

    async fn change_parent(&mut self) -> Result<String, StorageError>;

    async fn make_directory(&self, path: &str) -> Result<String, StorageError>;

    async fn remove_directory(&self, path: &str) -> Result<String, StorageError>;

    async fn delete_file(&self, path: &str) -> Result<String, StorageError>;

    /// Resolve a path that must already exist (RNFR)
    async fn existing(&self, path: &str) -> Result<String, StorageError>;

    async fn rename(&self, from: &str, to: &str) -> Result<String, StorageError>;

    async fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Bare names (NLST)
    async fn list(&self, path: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// `ls -l` style lines (LIST)
    async fn list_full(&self, path: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Bytes available to the user, when the platform can tell
    async fn free_space(&self) -> Result<Option<u64>, StorageError>;

    async fn open_file(
        &self,
        path: &str,
        mode: OpenMode,
        offset: u64,
    ) -> Result<Box<dyn FtpFile>, StorageError>;

    /// Create a new file under a name no other file in the cwd has (STOU)
    async fn unique_file(&self, hint: Option<&str>) -> Result<Box<dyn FtpFile>, StorageError>;
}
