use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use super::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_quota_bytes: Option<i64>,
    /// Logical bytes: every file the user owns, duplicates included.
    pub storage_used_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub storage_quota_bytes: Option<i64>,
}

/// One row per unique content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalFile {
    pub id: i64,
    pub hash: String,
    pub blob_path: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub reference_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPhysicalFile {
    pub hash: String,
    pub blob_path: String,
    pub size_bytes: i64,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Folder,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Folder => "folder",
        }
    }

    pub fn parse(s: &str) -> Option<ResourceKind> {
        match s {
            "file" => Some(ResourceKind::File),
            "folder" => Some(ResourceKind::Folder),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ResourceKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ResourceKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ResourceKind::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown resource kind '{s}'").into()))
    }
}

/// A node in the file/folder tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub owner_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub name: String,
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_file_id: Option<i64>,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ResourceKind::Folder
    }
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub kind: ResourceKind,
    pub physical_file_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// A resource with its owner and, for files, its ledger row attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    #[serde(flatten)]
    pub resource: Resource,
    pub owner: OwnerSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PhysicalFile>,
}

/// ACL row: at most one per (resource, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub resource_id: i64,
    pub user_id: i64,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorLink {
    pub ancestor_id: i64,
    pub descendant_id: i64,
    pub depth: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub unique_files: i64,
    /// Bytes actually on disk.
    pub physical_bytes: i64,
    /// Bytes users would hold without deduplication.
    pub logical_bytes: i64,
    pub saved_bytes: i64,
}
