use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Runtime configuration for a [`Vault`](crate::vault::Vault).
///
/// Everything the core needs from its surroundings is carried here and handed
/// to the vault at construction; nothing is read from process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    /// Root of the blob directory. Defaults to `<data_dir>/blobs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    /// Quota applied to users created without an explicit one. `None` = unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_quota_bytes: Option<i64>,
    /// Largest single upload accepted. `None` = limited only by disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes: Option<i64>,
}

impl VaultConfig {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Reads a TOML config file. Relative paths inside it are kept as written.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir cannot be empty".to_string()));
        }
        if matches!(self.default_quota_bytes, Some(q) if q < 0) {
            return Err(Error::Config(
                "default_quota_bytes cannot be negative".to_string(),
            ));
        }
        if matches!(self.max_upload_bytes, Some(m) if m <= 0) {
            return Err(Error::Config(
                "max_upload_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("filevault.db")
    }

    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blobs"))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage_dir: None,
            default_quota_bytes: None,
            max_upload_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let config = VaultConfig::new("/srv/vault");
        assert_eq!(config.db_path(), PathBuf::from("/srv/vault/filevault.db"));
        assert_eq!(config.storage_root(), PathBuf::from("/srv/vault/blobs"));
    }

    #[test]
    fn test_storage_dir_override() {
        let config = VaultConfig {
            storage_dir: Some(PathBuf::from("/mnt/blobs")),
            ..VaultConfig::new("/srv/vault")
        };
        assert_eq!(config.storage_root(), PathBuf::from("/mnt/blobs"));
    }

    #[test]
    fn test_load_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("filevault.toml");
        fs::write(
            &path,
            "data_dir = \"/var/lib/filevault\"\ndefault_quota_bytes = 10485760\n",
        )
        .unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/filevault"));
        assert_eq!(config.default_quota_bytes, Some(10 * 1024 * 1024));
        assert_eq!(config.max_upload_bytes, None);
    }

    #[test]
    fn test_load_rejects_negative_quota() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("filevault.toml");
        fs::write(&path, "default_quota_bytes = -1\n").unwrap();

        assert!(matches!(VaultConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = VaultConfig::load(temp.path().join("missing.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
