use std::collections::BTreeSet;
use std::fs;

use rusqlite::Connection;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::access::{self, Access};
use crate::blob::{BlobStore, StagedBlob};
use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::store::names::validate_name;
use crate::store::{IndexDrift, SqliteStore, Store, ancestry, grants, ledger, tree, users};
use crate::types::{
    NewPhysicalFile, NewResource, NewUser, Permission, PhysicalFile, Resource, ResourceEntry,
    ResourceKind, Role, StorageStats, User,
};

/// Metadata for an upload; the bytes arrive separately as a reader.
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub filename: String,
    pub content_type: String,
    /// Size announced by the client, checked against the upload limit before
    /// any bytes are read.
    pub size_hint: Option<u64>,
}

/// A readable file: its resource, ledger row and an open blob.
#[derive(Debug)]
pub struct Download {
    pub resource: Resource,
    pub file: PhysicalFile,
    pub access: Access,
    pub reader: BufReader<File>,
}

/// What a share token resolves to.
#[derive(Debug, Clone, Serialize)]
pub struct SharedResource {
    pub entry: ResourceEntry,
    pub access: Access,
    /// Direct children when the shared resource is a folder.
    pub children: Vec<ResourceEntry>,
}

/// Coordinates the blob store and the metadata store.
///
/// Every mutation runs as one IMMEDIATE transaction. A new blob is renamed into
/// place inside that transaction and moved back out if it rolls back; released
/// blobs are unlinked only after the delete commits. Both happen before the
/// connection is released, so no other writer sees a ledger row without its
/// bytes.
pub struct Vault {
    store: SqliteStore,
    blobs: BlobStore,
    config: VaultConfig,
}

impl Vault {
    /// Opens (creating if needed) the database and blob root named by `config`.
    pub fn open(config: VaultConfig) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.data_dir)?;
        let storage_root = config.storage_root();
        fs::create_dir_all(&storage_root)?;

        let store = SqliteStore::new(config.db_path())?;
        store.initialize()?;

        info!(
            "Opened vault at {} (blobs in {})",
            config.data_dir.display(),
            storage_root.display()
        );

        Ok(Self::new(store, BlobStore::new(storage_root), config))
    }

    pub fn new(store: SqliteStore, blobs: BlobStore, config: VaultConfig) -> Self {
        Self {
            store,
            blobs,
            config,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // Users

    pub fn create_user(&self, username: &str, email: &str, quota: Option<i64>) -> Result<User> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(Error::validation("Username cannot be empty"));
        }
        if !email.contains('@') {
            return Err(Error::validation(format!("'{email}' is not an email address")));
        }
        if quota.is_some_and(|q| q < 0) {
            return Err(Error::validation("Storage quota cannot be negative"));
        }

        let new_user = NewUser {
            username: username.to_string(),
            email: email.to_string(),
            storage_quota_bytes: quota.or(self.config.default_quota_bytes),
        };
        let user = self.store.write(|tx| users::create(tx, &new_user))?;

        info!("Created user {} <{}> ({})", user.username, user.email, user.id);
        Ok(user)
    }

    pub fn user(&self, id: i64) -> Result<Option<User>> {
        self.store.read(|conn| users::get(conn, id))
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.read(|conn| users::get_by_email(conn, email))
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.store.read(users::list)
    }

    // Upload

    /// Streams `reader` into the blob store and records it as a file resource.
    ///
    /// Bytes are hashed while they are staged. The metadata transaction then
    /// either bumps the reference count of existing content or persists the
    /// staged blob and records it. A `Conflict` is retried once; the staged
    /// bytes are removed when the upload ends without a committed ledger row
    /// for them.
    pub async fn upload<R>(&self, upload: Upload, reader: R) -> Result<Resource>
    where
        R: AsyncRead + Unpin,
    {
        validate_name(&upload.filename)?;
        if let (Some(max), Some(hint)) = (self.config.max_upload_bytes, upload.size_hint) {
            if hint > max as u64 {
                return Err(Error::validation(format!(
                    "Upload of {hint} bytes exceeds the {max} byte limit"
                )));
            }
        }

        let staged = self.blobs.stage(reader).await?;
        let size = i64::try_from(staged.size())
            .map_err(|_| Error::validation("Upload is too large"))?;

        if let Some(max) = self.config.max_upload_bytes {
            if size > max {
                return Err(Error::validation(format!(
                    "Upload of {size} bytes exceeds the {max} byte limit"
                )));
            }
        }
        if let Some(hint) = upload.size_hint {
            if hint != staged.size() {
                debug!(
                    "Upload {} announced {hint} bytes but sent {}",
                    upload.filename,
                    staged.size()
                );
            }
        }
        debug!("Staged {} ({size} bytes) as {}", upload.filename, staged.hash());

        match self.record_upload(&upload, &staged, size) {
            Err(Error::Conflict(reason)) => {
                warn!("Retrying upload of {} after conflict: {reason}", staged.hash());
                self.record_upload(&upload, &staged, size)
            }
            result => result,
        }
    }

    fn record_upload(&self, upload: &Upload, staged: &StagedBlob, size: i64) -> Result<Resource> {
        let result = self.store.write_then(
            |tx| self.insert_upload(tx, upload, staged, size),
            |result| {
                // A rolled back miss must not leave bytes under the content address
                if result.is_err() {
                    if let Err(e) = self.blobs.unpersist(staged) {
                        warn!("Failed to roll back blob {}: {e}", staged.hash());
                    }
                }
            },
        );

        if let Ok(resource) = &result {
            info!(
                "Uploaded {} as resource {} for user {}",
                resource.name, resource.id, resource.owner_id
            );
        }
        result
    }

    fn insert_upload(
        &self,
        tx: &Connection,
        upload: &Upload,
        staged: &StagedBlob,
        size: i64,
    ) -> Result<Resource> {
        let owner = users::get(tx, upload.owner_id)?
            .ok_or_else(|| Error::not_found(format!("user {}", upload.owner_id)))?;

        if let Some(quota) = owner.storage_quota_bytes {
            let exceeds = owner
                .storage_used_bytes
                .checked_add(size)
                .is_none_or(|total| total > quota);
            if exceeds {
                return Err(Error::QuotaExceeded {
                    used: owner.storage_used_bytes,
                    quota,
                    requested: size,
                });
            }
        }

        if let Some(parent_id) = upload.parent_id {
            require_parent_folder(tx, parent_id, owner.id)?;
        }

        let physical = match ledger::find_by_hash(tx, staged.hash())? {
            Some(existing) => {
                ledger::increment(tx, existing.id)?;
                debug!(
                    "Dedup hit for {} (physical file {})",
                    existing.hash, existing.id
                );
                existing
            }
            None => {
                let blob_path = BlobStore::relative_path(staged.hash())?;
                let path = self.blobs.persist(staged)?;
                let created = ledger::create(
                    tx,
                    &NewPhysicalFile {
                        hash: staged.hash().to_string(),
                        blob_path,
                        size_bytes: size,
                        content_type: upload.content_type.clone(),
                    },
                )?;
                debug!("Dedup miss for {}, stored at {}", created.hash, path.display());
                created
            }
        };

        let resource = tree::create(
            tx,
            &NewResource {
                owner_id: owner.id,
                parent_id: upload.parent_id,
                name: upload.filename.clone(),
                kind: ResourceKind::File,
                physical_file_id: Some(physical.id),
            },
        )?;
        ancestry::attach(tx, resource.id, resource.parent_id)?;
        grants::upsert(tx, resource.id, owner.id, Role::Editor)?;
        users::adjust_storage_used(tx, owner.id, size)?;

        Ok(resource)
    }

    // Folders

    pub fn create_folder(&self, owner_id: i64, parent_id: Option<i64>, name: &str) -> Result<Resource> {
        validate_name(name)?;

        let folder = self.store.write(|tx| {
            let owner = users::get(tx, owner_id)?
                .ok_or_else(|| Error::not_found(format!("user {owner_id}")))?;
            if let Some(parent_id) = parent_id {
                require_parent_folder(tx, parent_id, owner.id)?;
            }

            let folder = tree::create(
                tx,
                &NewResource {
                    owner_id: owner.id,
                    parent_id,
                    name: name.to_string(),
                    kind: ResourceKind::Folder,
                    physical_file_id: None,
                },
            )?;
            ancestry::attach(tx, folder.id, parent_id)?;
            grants::upsert(tx, folder.id, owner.id, Role::Editor)?;
            Ok(folder)
        })?;

        info!("Created folder {} ({}) for user {}", folder.name, folder.id, owner_id);
        Ok(folder)
    }

    // Delete

    /// Deletes a resource and, for folders, its whole subtree.
    ///
    /// Every file in the subtree gives back one reference and its bytes to the
    /// owner's usage. Content whose count reaches zero loses its ledger row,
    /// and its blob is unlinked once that deletion has committed. A blob that
    /// cannot be removed is logged and left behind.
    pub fn delete(&self, resource_id: i64, user_id: i64) -> Result<()> {
        let (resource, files, released) = self.store.write_then(
            |tx| {
                let resource = load_resource(tx, resource_id)?;
                access::require_owner(&resource, user_id, "delete")?;

                let files = tree::subtree_files(tx, resource.id)?;
                for file in &files {
                    ledger::decrement(tx, file.physical_file_id)?;
                    users::adjust_storage_used(tx, file.owner_id, -file.size_bytes)?;
                }

                tree::delete(tx, resource.id)?;

                let physical_ids: BTreeSet<i64> = files.iter().map(|f| f.physical_file_id).collect();
                let mut released = Vec::new();
                for id in physical_ids {
                    let Some(physical) = ledger::find_by_id(tx, id)? else {
                        continue;
                    };
                    if physical.reference_count > 0 {
                        continue;
                    }
                    ledger::delete(tx, physical.id)?;
                    debug!("Released physical file {} ({})", physical.id, physical.hash);
                    released.push(physical.hash);
                }

                Ok((resource, files.len(), released))
            },
            |result| {
                if let Ok((_, _, released)) = result {
                    for hash in released {
                        self.discard_blob(hash);
                    }
                }
            },
        )?;

        info!(
            "Deleted {} {} ({}) with {} file(s), released {} blob(s)",
            resource.kind,
            resource.name,
            resource.id,
            files,
            released.len()
        );
        Ok(())
    }

    // Rename / move

    pub fn rename(&self, resource_id: i64, user_id: i64, new_name: &str) -> Result<Resource> {
        validate_name(new_name)?;

        let renamed = self.store.write(|tx| {
            let resource = load_resource(tx, resource_id)?;
            access::require_owner(&resource, user_id, "rename")?;
            tree::rename(tx, resource.id, new_name)?;
            load_resource(tx, resource.id)
        })?;

        info!("Renamed resource {} to {}", renamed.id, renamed.name);
        Ok(renamed)
    }

    /// Moves a resource under `new_parent_id` (or to the owner's root).
    ///
    /// The destination must be a folder owned by the requester and must not
    /// lie inside the moved subtree. The ancestor index is relinked in the same
    /// transaction.
    pub fn move_resource(
        &self,
        resource_id: i64,
        user_id: i64,
        new_parent_id: Option<i64>,
    ) -> Result<Resource> {
        if new_parent_id == Some(resource_id) {
            return Err(Error::validation("A resource cannot be moved into itself"));
        }

        let moved = self.store.write(|tx| {
            let resource = load_resource(tx, resource_id)?;
            access::require_owner(&resource, user_id, "move")?;

            if let Some(parent_id) = new_parent_id {
                require_parent_folder(tx, parent_id, user_id)?;
                if ancestry::is_within_subtree(tx, resource.id, parent_id)? {
                    return Err(Error::validation(format!(
                        "Cannot move resource {} into its own descendant {parent_id}",
                        resource.id
                    )));
                }
            }

            if resource.parent_id == new_parent_id {
                return Ok(resource);
            }

            tree::set_parent(tx, resource.id, new_parent_id)?;
            let linked = ancestry::relink_subtree(tx, resource.id, new_parent_id)?;
            debug!("Relinked subtree of {} with {linked} ancestor rows", resource.id);
            load_resource(tx, resource.id)
        })?;

        info!(
            "Moved resource {} under {}",
            moved.id,
            moved
                .parent_id
                .map_or_else(|| "root".to_string(), |id| id.to_string())
        );
        Ok(moved)
    }

    // Reads

    /// Children of `parent_id`, or the caller's root resources when `None`.
    pub fn list_children(&self, parent_id: Option<i64>, user_id: i64) -> Result<Vec<ResourceEntry>> {
        self.store.read(|conn| match parent_id {
            Some(parent_id) => {
                let parent = load_resource(conn, parent_id)?;
                access::require_access(conn, &parent, Some(user_id))?;
                if !parent.is_folder() {
                    return Err(Error::validation(format!("Resource {parent_id} is not a folder")));
                }
                tree::list_children(conn, parent.id)
            }
            None => tree::list_roots(conn, user_id),
        })
    }

    pub fn resource(&self, resource_id: i64) -> Result<Option<Resource>> {
        self.store.read(|conn| tree::get(conn, resource_id))
    }

    pub fn check_access(&self, resource_id: i64, user_id: Option<i64>) -> Result<Option<Access>> {
        self.store.read(|conn| {
            let resource = load_resource(conn, resource_id)?;
            access::check_access(conn, &resource, user_id)
        })
    }

    pub fn is_public(&self, resource_id: i64) -> Result<bool> {
        self.store.read(|conn| {
            let resource = load_resource(conn, resource_id)?;
            access::is_public(conn, &resource)
        })
    }

    pub fn is_owner(&self, resource_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.store.read(|conn| load_resource(conn, resource_id))?.owner_id == user_id)
    }

    /// Opens a file for reading after an access check. Public files are
    /// readable without a user.
    pub async fn download(&self, resource_id: i64, user_id: Option<i64>) -> Result<Download> {
        let (resource, file, access) = self.store.read(|conn| {
            let resource = load_resource(conn, resource_id)?;
            let access = access::require_access(conn, &resource, user_id)?;

            let physical_file_id = match (resource.kind, resource.physical_file_id) {
                (ResourceKind::File, Some(id)) => id,
                _ => {
                    return Err(Error::validation(format!(
                        "Resource {resource_id} is not a file"
                    )));
                }
            };
            let file = ledger::find_by_id(conn, physical_file_id)?
                .ok_or_else(|| Error::not_found(format!("physical file {physical_file_id}")))?;
            Ok((resource, file, access))
        })?;

        let (reader, _) = self.blobs.open(&file.hash).await?;
        debug!("Opened {} for download ({:?})", resource.id, access);

        Ok(Download {
            resource,
            file,
            access,
            reader,
        })
    }

    pub fn resolve_share_link(&self, token: &str, user_id: Option<i64>) -> Result<SharedResource> {
        self.store.read(|conn| {
            let resource = tree::get_by_share_token(conn, token)?
                .ok_or_else(|| Error::not_found("share link"))?;
            let access = access::require_access(conn, &resource, user_id)?;

            let entry = tree::get_entry(conn, resource.id)?
                .ok_or_else(|| Error::not_found(format!("resource {}", resource.id)))?;
            let children = if resource.is_folder() {
                tree::list_children(conn, resource.id)?
            } else {
                Vec::new()
            };

            Ok(SharedResource {
                entry,
                access,
                children,
            })
        })
    }

    // Sharing

    pub fn grant(
        &self,
        resource_id: i64,
        owner_id: i64,
        target_user_id: i64,
        role: Role,
    ) -> Result<Permission> {
        let permission = self.store.write(|tx| {
            let resource = load_resource(tx, resource_id)?;
            access::require_owner(&resource, owner_id, "share")?;
            if target_user_id == owner_id {
                return Err(Error::validation("Cannot share a resource with yourself"));
            }
            users::get(tx, target_user_id)?
                .ok_or_else(|| Error::not_found(format!("user {target_user_id}")))?;

            grants::upsert(tx, resource.id, target_user_id, role)?;
            grants::get(tx, resource.id, target_user_id)?
                .ok_or_else(|| Error::not_found("permission"))
        })?;

        info!(
            "Granted {} on resource {} to user {}",
            permission.role, permission.resource_id, permission.user_id
        );
        Ok(permission)
    }

    /// Returns whether a permission row was removed.
    pub fn revoke(&self, resource_id: i64, owner_id: i64, target_user_id: i64) -> Result<bool> {
        let removed = self.store.write(|tx| {
            let resource = load_resource(tx, resource_id)?;
            access::require_owner(&resource, owner_id, "unshare")?;
            if target_user_id == owner_id {
                return Err(Error::validation("Cannot revoke the owner's own access"));
            }
            grants::delete(tx, resource.id, target_user_id)
        })?;

        if removed {
            info!("Revoked access to resource {resource_id} from user {target_user_id}");
        }
        Ok(removed)
    }

    pub fn permissions(&self, resource_id: i64, owner_id: i64) -> Result<Vec<Permission>> {
        self.store.read(|conn| {
            let resource = load_resource(conn, resource_id)?;
            access::require_owner(&resource, owner_id, "list permissions of")?;
            grants::list_for_resource(conn, resource.id)
        })
    }

    pub fn set_public(&self, resource_id: i64, owner_id: i64, is_public: bool) -> Result<Resource> {
        let resource = self.store.write(|tx| {
            let resource = load_resource(tx, resource_id)?;
            access::require_owner(&resource, owner_id, "publish")?;
            tree::set_public(tx, resource.id, is_public)?;
            load_resource(tx, resource.id)
        })?;

        info!(
            "Resource {} is now {}",
            resource.id,
            if resource.is_public { "public" } else { "private" }
        );
        Ok(resource)
    }

    // Maintenance

    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.store.read(ledger::stats)
    }

    pub fn index_drift(&self) -> Result<IndexDrift> {
        self.store.read(ancestry::drift)
    }

    /// Rebuilds the ancestor index from parent pointers. Returns the number of
    /// rows written.
    pub fn reindex(&self) -> Result<usize> {
        let rows = self.store.write(|tx| ancestry::rebuild(tx))?;
        info!("Rebuilt ancestor index ({rows} rows)");
        Ok(rows)
    }

    fn discard_blob(&self, hash: &str) {
        match self.blobs.remove(hash) {
            Ok(true) => debug!("Removed blob {hash}"),
            Ok(false) => warn!("Blob {hash} was already missing"),
            Err(e) => warn!("Failed to remove blob {hash}: {e}"),
        }
    }
}

fn load_resource(conn: &Connection, resource_id: i64) -> Result<Resource> {
    tree::get(conn, resource_id)?.ok_or_else(|| Error::not_found(format!("resource {resource_id}")))
}

/// A parent for new or moved content: it must exist, belong to `user_id` and
/// be a folder.
fn require_parent_folder(conn: &Connection, parent_id: i64, user_id: i64) -> Result<Resource> {
    let parent = tree::get(conn, parent_id)?
        .ok_or_else(|| Error::validation(format!("Parent folder {parent_id} does not exist")))?;

    if parent.owner_id != user_id {
        return Err(Error::unauthorized(format!(
            "Parent folder {parent_id} belongs to another user"
        )));
    }
    if !parent.is_folder() {
        return Err(Error::validation(format!("Parent {parent_id} is not a folder")));
    }
    Ok(parent)
}
