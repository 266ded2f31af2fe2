//! File system operations
//!
//! Local-disk implementation of the storage traits. Each session gets its own
//! [`LocalDirectory`] rooted at `server_root/<business root>`.

use async_trait::async_trait;
use log::{debug, info};
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::StorageError;
use crate::storage::operations::{format_list_line, unique_name};
use crate::storage::validation::{
    ensure_within_root, file_name, resolve_virtual_path, virtual_to_real_path,
};
use crate::storage::{FtpDirectory, FtpFile, OpenMode};

const MAX_UNIQUE_ATTEMPTS: u32 = 100;

fn map_io(err: io::Error, shown: &str) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::FileNotFound(shown.to_string()),
        io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(shown.to_string()),
        io::ErrorKind::AlreadyExists => StorageError::FileAlreadyExists(shown.to_string()),
        _ => StorageError::Io(err),
    }
}

fn not_found_as_directory(err: StorageError) -> StorageError {
    match err {
        StorageError::FileNotFound(path) => StorageError::DirectoryNotFound(path),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct LocalDirectory {
    base: PathBuf,
    root: String,
    cwd: String,
}

impl LocalDirectory {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            root: "/".to_string(),
            cwd: "/".to_string(),
        }
    }

    fn root_path(&self) -> PathBuf {
        virtual_to_real_path(&self.base, &self.root)
    }

    fn resolve(&self, target: &str) -> Result<(String, PathBuf), StorageError> {
        let virtual_path = resolve_virtual_path(&self.cwd, target)?;
        let real = virtual_to_real_path(&self.root_path(), &virtual_path);
        Ok((virtual_path, real))
    }

    async fn existing_entry(&self, target: &str) -> Result<(String, PathBuf, Metadata), StorageError> {
        let (virtual_path, real) = self.resolve(target)?;
        let metadata = fs::metadata(&real)
            .await
            .map_err(|e| map_io(e, &virtual_path))?;
        ensure_within_root(&self.root_path(), &real, &virtual_path)?;
        Ok((virtual_path, real, metadata))
    }

    async fn writable_target(&self, target: &str) -> Result<(String, PathBuf), StorageError> {
        let (virtual_path, real) = self.resolve(target)?;
        if virtual_path == "/" {
            return Err(StorageError::InvalidPath(virtual_path));
        }
        let parent = real
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root_path());
        let parent_meta = fs::metadata(&parent)
            .await
            .map_err(|_| StorageError::DirectoryNotFound(virtual_path.clone()))?;
        if !parent_meta.is_dir() {
            return Err(StorageError::NotADirectory(virtual_path));
        }
        ensure_within_root(&self.root_path(), &parent, &virtual_path)?;
        if let Ok(meta) = fs::metadata(&real).await {
            if meta.is_dir() {
                return Err(StorageError::NotAFile(virtual_path));
            }
        }
        Ok((virtual_path, real))
    }

    async fn entries(&self, path: Option<&str>) -> Result<Vec<(String, Metadata)>, StorageError> {
        let (virtual_path, real, metadata) = self
            .existing_entry(path.unwrap_or("."))
            .await
            .map_err(not_found_as_directory)?;

        if !metadata.is_dir() {
            return Ok(vec![(file_name(&virtual_path).to_string(), metadata)]);
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&real)
            .await
            .map_err(|e| map_io(e, &virtual_path))?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata().await {
                Ok(meta) => entries.push((name, meta)),
                Err(e) => debug!("Skipping {} in {}: {}", name, virtual_path, e),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait]
impl FtpDirectory for LocalDirectory {
    async fn initialize(&mut self, root: &str) -> Result<(), StorageError> {
        self.root = resolve_virtual_path("/", root)?;
        self.cwd = "/".to_string();
        let real = self.root_path();
        fs::create_dir_all(&real).await?;
        info!("Session rooted at {} ({})", self.root, real.display());
        Ok(())
    }

    fn pwd(&self) -> String {
        self.cwd.clone()
    }

    async fn change_directory(&mut self, path: &str) -> Result<String, StorageError> {
        let (virtual_path, _, metadata) = self
            .existing_entry(path)
            .await
            .map_err(not_found_as_directory)?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(virtual_path));
        }
        self.cwd = virtual_path.clone();
        Ok(virtual_path)
    }

    async fn change_parent(&mut self) -> Result<String, StorageError> {
        self.change_directory("..").await
    }

    async fn make_directory(&self, path: &str) -> Result<String, StorageError> {
        let (virtual_path, real) = self.writable_target(path).await?;
        fs::create_dir(&real)
            .await
            .map_err(|e| map_io(e, &virtual_path))?;
        Ok(virtual_path)
    }

    async fn remove_directory(&self, path: &str) -> Result<String, StorageError> {
        let (virtual_path, real, metadata) = self
            .existing_entry(path)
            .await
            .map_err(not_found_as_directory)?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(virtual_path));
        }
        if virtual_path == "/" {
            return Err(StorageError::PermissionDenied(virtual_path));
        }
        fs::remove_dir(&real)
            .await
            .map_err(|_| StorageError::PermissionDenied(virtual_path.clone()))?;
        Ok(virtual_path)
    }

    async fn delete_file(&self, path: &str) -> Result<String, StorageError> {
        let (virtual_path, real, metadata) = self.existing_entry(path).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotAFile(virtual_path));
        }
        fs::remove_file(&real)
            .await
            .map_err(|e| map_io(e, &virtual_path))?;
        Ok(virtual_path)
    }

    async fn existing(&self, path: &str) -> Result<String, StorageError> {
        let (virtual_path, _, _) = self.existing_entry(path).await?;
        if virtual_path == "/" {
            return Err(StorageError::PermissionDenied(virtual_path));
        }
        Ok(virtual_path)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<String, StorageError> {
        let (from_virtual, from_real, _) = self.existing_entry(from).await?;
        let (to_virtual, to_real) = self.resolve(to)?;
        if fs::try_exists(&to_real).await.unwrap_or(false) {
            return Err(StorageError::FileAlreadyExists(to_virtual));
        }
        if let Some(parent) = to_real.parent() {
            ensure_within_root(&self.root_path(), parent, &to_virtual)
                .map_err(not_found_as_directory)?;
        }
        fs::rename(&from_real, &to_real)
            .await
            .map_err(|e| map_io(e, &from_virtual))?;
        Ok(to_virtual)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let (virtual_path, _, metadata) = self.existing_entry(path).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotAFile(virtual_path));
        }
        Ok(metadata.len())
    }

    async fn list(&self, path: Option<&str>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries(path)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn list_full(&self, path: Option<&str>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries(path)
            .await?
            .iter()
            .map(|(name, meta)| format_list_line(name, meta))
            .collect())
    }

    #[cfg(unix)]
    async fn free_space(&self) -> Result<Option<u64>, StorageError> {
        let stats = rustix::fs::statvfs(self.root_path()).map_err(io::Error::from)?;
        Ok(Some(stats.f_bavail.saturating_mul(stats.f_frsize)))
    }

    #[cfg(not(unix))]
    async fn free_space(&self) -> Result<Option<u64>, StorageError> {
        Ok(None)
    }

    async fn open_file(
        &self,
        path: &str,
        mode: OpenMode,
        offset: u64,
    ) -> Result<Box<dyn FtpFile>, StorageError> {
        let (virtual_path, real) = match mode {
            OpenMode::Read => {
                let (virtual_path, real, metadata) = self.existing_entry(path).await?;
                if !metadata.is_file() {
                    return Err(StorageError::NotAFile(virtual_path));
                }
                (virtual_path, real)
            }
            OpenMode::Write | OpenMode::Append => self.writable_target(path).await?,
        };
        let file = LocalFile::open(virtual_path, real, mode, offset).await?;
        Ok(Box::new(file))
    }

    async fn unique_file(&self, hint: Option<&str>) -> Result<Box<dyn FtpFile>, StorageError> {
        for attempt in 0..MAX_UNIQUE_ATTEMPTS {
            let (virtual_path, real) = self.writable_target(&unique_name(hint, attempt)).await?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&real)
                .await
            {
                Ok(handle) => {
                    return Ok(Box::new(LocalFile {
                        path: virtual_path,
                        real,
                        handle: Some(handle),
                        mode: OpenMode::Write,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(map_io(e, &virtual_path)),
            }
        }
        Err(StorageError::FileAlreadyExists(
            unique_name(hint, MAX_UNIQUE_ATTEMPTS),
        ))
    }
}

/// A file on local disk opened for exactly one transfer
#[derive(Debug)]
pub struct LocalFile {
    path: String,
    real: PathBuf,
    handle: Option<File>,
    mode: OpenMode,
}

impl LocalFile {
    pub async fn open(
        path: String,
        real: PathBuf,
        mode: OpenMode,
        offset: u64,
    ) -> Result<Self, StorageError> {
        let handle = match mode {
            OpenMode::Read => {
                let mut file = File::open(&real).await.map_err(|e| map_io(e, &path))?;
                let len = file.metadata().await?.len();
                if offset > len {
                    return Err(StorageError::InvalidRestartOffset(offset));
                }
                file.seek(SeekFrom::Start(offset)).await?;
                file
            }
            OpenMode::Write if offset == 0 => {
                File::create(&real).await.map_err(|e| map_io(e, &path))?
            }
            OpenMode::Write => {
                let mut file = OpenOptions::new()
                    .write(true)
                    .open(&real)
                    .await
                    .map_err(|e| map_io(e, &path))?;
                if offset > file.metadata().await?.len() {
                    return Err(StorageError::InvalidRestartOffset(offset));
                }
                file.set_len(offset).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                file
            }
            OpenMode::Append => OpenOptions::new()
                .append(true)
                .create(true)
                .open(&real)
                .await
                .map_err(|e| map_io(e, &path))?,
        };
        debug!("Opened {} ({:?}, offset {})", path, mode, offset);
        Ok(Self {
            path,
            real,
            handle: Some(handle),
            mode,
        })
    }

    fn handle_for(&mut self, reading: bool) -> Result<&mut File, StorageError> {
        let open_for_reading = self.mode == OpenMode::Read;
        match self.handle.as_mut() {
            Some(handle) if open_for_reading == reading => Ok(handle),
            _ => Err(StorageError::FileBusy(self.path.clone())),
        }
    }
}

#[async_trait]
impl FtpFile for LocalFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn read_block(&mut self, block_size: usize) -> Result<Option<Vec<u8>>, StorageError> {
        let handle = self.handle_for(true)?;
        let mut block = vec![0u8; block_size];
        let n = handle.read(&mut block).await?;
        if n == 0 {
            return Ok(None);
        }
        block.truncate(n);
        Ok(Some(block))
    }

    async fn write_block(&mut self, block: &[u8]) -> Result<(), StorageError> {
        let handle = self.handle_for(false)?;
        handle.write_all(block).await?;
        Ok(())
    }

    async fn exists(&self) -> bool {
        fs::try_exists(&self.real).await.unwrap_or(false)
    }

    async fn length(&self) -> Result<u64, StorageError> {
        let metadata = fs::metadata(&self.real)
            .await
            .map_err(|e| map_io(e, &self.path))?;
        Ok(metadata.len())
    }

    fn is_in_reading(&self) -> bool {
        self.handle.is_some() && self.mode == OpenMode::Read
    }

    fn is_in_writing(&self) -> bool {
        self.handle.is_some() && self.mode != OpenMode::Read
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut handle) = self.handle.take() {
            handle.flush().await?;
            if self.mode != OpenMode::Read {
                handle.sync_all().await?;
            }
        }
        Ok(())
    }

    async fn abort(&mut self) {
        if self.handle.take().is_some() {
            debug!("Abandoned {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rooted(base: &Path) -> LocalDirectory {
        let mut dir = LocalDirectory::new(base);
        dir.initialize("/alice").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn initialize_creates_user_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = rooted(tmp.path()).await;
        assert!(tmp.path().join("alice").is_dir());
        assert_eq!(dir.pwd(), "/");
    }

    #[tokio::test]
    async fn directory_navigation_stays_inside_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dir = rooted(tmp.path()).await;
        assert_eq!(dir.make_directory("docs").await.unwrap(), "/docs");
        assert_eq!(dir.change_directory("docs").await.unwrap(), "/docs");
        assert_eq!(dir.change_parent().await.unwrap(), "/");
        assert_eq!(dir.change_directory("../..").await.unwrap(), "/");
        assert!(matches!(
            dir.change_directory("missing").await,
            Err(StorageError::DirectoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn write_then_read_blocks_with_restart_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = rooted(tmp.path()).await;

        let mut file = dir.open_file("data.bin", OpenMode::Write, 0).await.unwrap();
        assert!(file.is_in_writing());
        file.write_block(b"hello world").await.unwrap();
        file.close().await.unwrap();
        assert!(!file.is_in_writing());
        assert_eq!(dir.size("data.bin").await.unwrap(), 11);

        let mut file = dir.open_file("data.bin", OpenMode::Read, 6).await.unwrap();
        assert!(file.is_in_reading());
        assert_eq!(file.read_block(4).await.unwrap(), Some(b"worl".to_vec()));
        assert_eq!(file.read_block(4).await.unwrap(), Some(b"d".to_vec()));
        assert_eq!(file.read_block(4).await.unwrap(), None);

        assert!(matches!(
            dir.open_file("data.bin", OpenMode::Read, 99).await,
            Err(StorageError::InvalidRestartOffset(99))
        ));
    }

    #[tokio::test]
    async fn rename_list_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = rooted(tmp.path()).await;
        let mut file = dir.open_file("a.txt", OpenMode::Write, 0).await.unwrap();
        file.write_block(b"x").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(dir.rename("a.txt", "b.txt").await.unwrap(), "/b.txt");
        assert_eq!(dir.list(None).await.unwrap(), vec!["b.txt".to_string()]);
        let full = dir.list_full(None).await.unwrap();
        assert!(full[0].ends_with(" b.txt"));

        dir.delete_file("b.txt").await.unwrap();
        assert!(dir.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unique_files_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = rooted(tmp.path()).await;
        let first = dir.unique_file(Some("upload")).await.unwrap();
        let second = dir.unique_file(Some("upload")).await.unwrap();
        assert_eq!(first.path(), "/upload");
        assert_eq!(second.path(), "/upload.1");
    }
}
