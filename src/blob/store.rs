use std::cell::Cell;
use std::fs as std_fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::InspectReader;
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found")]
    NotFound,
    #[error("invalid content hash")]
    InvalidHash,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

/// Bytes written to the staging area and hashed, not yet visible under their
/// content address. Dropping an unpersisted blob deletes the staging file.
#[derive(Debug)]
pub struct StagedBlob {
    path: PathBuf,
    hash: String,
    size: u64,
    persisted: Cell<bool>,
}

impl StagedBlob {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            hash: String::new(),
            size: 0,
            persisted: Cell::new(false),
        }
    }

    /// Lowercase hex SHA-256 of the staged bytes.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted.get()
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.persisted.get() {
            return;
        }
        match std_fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove staging file {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Content-addressed blob directory: `<root>/<h[0:2]>/<h[2:4]>/<h>`.
///
/// Locations are always derived from the hash and the current root, never read
/// back from metadata, so a vault can be opened under any spelling of its path.
///
/// Staging and reads are async. Persisting and removing are synchronous because
/// the vault performs them while it holds the metadata connection.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, hash: &str) -> Result<PathBuf, BlobError> {
        Ok(self.root.join(Self::relative_path(hash)?))
    }

    /// The blob's location below the root, e.g. `a6/65/a665a4...`.
    pub fn relative_path(hash: &str) -> Result<String, BlobError> {
        validate_hash(hash)?;
        Ok(format!("{}/{}/{hash}", &hash[0..2], &hash[2..4]))
    }

    fn staging_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(Uuid::new_v4().to_string())
    }

    pub async fn exists(&self, hash: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(hash)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Streams `reader` into the staging area, hashing it on the way through.
    pub async fn stage<R>(&self, reader: R) -> Result<StagedBlob, BlobError>
    where
        R: AsyncRead + Unpin,
    {
        let mut staged = StagedBlob::new(self.staging_path());
        if let Some(parent) = staged.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(&staged.path).await?;
        let mut hasher = Sha256::new();
        let size = {
            let mut reader = InspectReader::new(reader, |chunk: &[u8]| hasher.update(chunk));
            tokio::io::copy(&mut reader, &mut file).await?
        };
        file.sync_all().await?;
        drop(file);

        staged.hash = hex::encode(hasher.finalize());
        staged.size = size;
        Ok(staged)
    }

    /// Moves a staged blob to its content address and returns the final path.
    /// Intermediate shard directories are created as needed.
    pub fn persist(&self, staged: &StagedBlob) -> Result<PathBuf, BlobError> {
        let final_path = self.blob_path(&staged.hash)?;

        if staged.persisted.get() {
            return if final_path.exists() {
                Ok(final_path)
            } else {
                Err(BlobError::NotFound)
            };
        }

        if let Some(parent) = final_path.parent() {
            std_fs::create_dir_all(parent)?;
        }
        std_fs::rename(&staged.path, &final_path)?;
        staged.persisted.set(true);

        Ok(final_path)
    }

    /// Moves a persisted blob back into staging. It is then removed when
    /// `staged` drops, unless it is persisted again first.
    pub fn unpersist(&self, staged: &StagedBlob) -> Result<(), BlobError> {
        if !staged.persisted.get() {
            return Ok(());
        }

        let final_path = self.blob_path(&staged.hash)?;
        std_fs::rename(&final_path, &staged.path).map_err(BlobError::from_io)?;
        staged.persisted.set(false);
        Ok(())
    }

    /// Stages and persists in one call.
    pub async fn put<R>(&self, reader: R) -> Result<(String, PathBuf), BlobError>
    where
        R: AsyncRead + Unpin,
    {
        let staged = self.stage(reader).await?;
        let path = self.persist(&staged)?;
        Ok((staged.hash.clone(), path))
    }

    pub async fn open(&self, hash: &str) -> Result<(BufReader<File>, u64), BlobError> {
        let path = self.blob_path(hash)?;
        let file = File::open(&path).await.map_err(BlobError::from_io)?;
        let size = file.metadata().await?.len();
        Ok((BufReader::new(file), size))
    }

    /// Returns `Ok(false)` if there was nothing to remove.
    pub fn remove(&self, hash: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(hash)?;
        match std_fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}

fn validate_hash(hash: &str) -> Result<(), BlobError> {
    if hash.len() != 64 {
        return Err(BlobError::InvalidHash);
    }

    if !hash
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    {
        return Err(BlobError::InvalidHash);
    }

    Ok(())
}

#[must_use]
pub fn is_valid_hash(hash: &str) -> bool {
    validate_hash(hash).is_ok()
}
