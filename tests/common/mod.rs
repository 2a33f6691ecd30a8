#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filevault::config::VaultConfig;
use filevault::store::{Store, ledger};
use filevault::types::{PhysicalFile, Resource, User};
use filevault::vault::{Download, Upload, Vault};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

pub struct TestVault {
    pub temp_dir: TempDir,
    pub vault: Arc<Vault>,
}

impl TestVault {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut VaultConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = VaultConfig::new(temp_dir.path());
        configure(&mut config);
        let vault = Vault::open(config).expect("open vault");

        Self {
            temp_dir,
            vault: Arc::new(vault),
        }
    }

    pub fn user(&self, name: &str) -> User {
        self.vault
            .create_user(name, &format!("{name}@example.com"), None)
            .expect("create user")
    }

    pub fn folder(&self, owner: &User, parent: Option<i64>, name: &str) -> Resource {
        self.vault
            .create_folder(owner.id, parent, name)
            .expect("create folder")
    }

    pub async fn upload(&self, owner: &User, parent: Option<i64>, name: &str, bytes: &[u8]) -> Resource {
        self.try_upload(owner, parent, name, bytes)
            .await
            .expect("upload")
    }

    pub async fn try_upload(
        &self,
        owner: &User,
        parent: Option<i64>,
        name: &str,
        bytes: &[u8],
    ) -> filevault::error::Result<Resource> {
        self.vault
            .upload(upload_request(owner.id, parent, name, bytes.len()), bytes)
            .await
    }

    pub fn physical_file(&self, hash: &str) -> Option<PhysicalFile> {
        self.vault
            .store()
            .read(|conn| ledger::find_by_hash(conn, hash))
            .expect("query ledger")
    }

    pub fn physical_file_of(&self, resource: &Resource) -> PhysicalFile {
        let id = resource.physical_file_id.expect("file resource");
        self.vault
            .store()
            .read(|conn| ledger::find_by_id(conn, id))
            .expect("query ledger")
            .expect("ledger row")
    }

    /// Every persisted blob under the storage root, staging excluded.
    pub fn blob_files(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_files(self.vault.blobs().root(), &mut found);
        found
            .into_iter()
            .filter(|p| !p.components().any(|c| c.as_os_str() == ".staging"))
            .collect()
    }

    pub fn staging_files(&self) -> usize {
        let mut found = Vec::new();
        collect_files(&self.vault.blobs().root().join(".staging"), &mut found);
        found.len()
    }

    pub fn storage_used(&self, user: &User) -> i64 {
        self.vault
            .user(user.id)
            .expect("query user")
            .expect("user exists")
            .storage_used_bytes
    }
}

pub fn upload_request(owner_id: i64, parent_id: Option<i64>, name: &str, size: usize) -> Upload {
    Upload {
        owner_id,
        parent_id,
        filename: name.to_string(),
        content_type: "application/octet-stream".to_string(),
        size_hint: Some(size as u64),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub async fn read_download(mut download: Download) -> Vec<u8> {
    let mut content = Vec::new();
    download
        .reader
        .read_to_end(&mut content)
        .await
        .expect("read blob");
    content
}

fn collect_files(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, found);
        } else {
            found.push(path);
        }
    }
}
