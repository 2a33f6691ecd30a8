//! Resource tree rows. Closure maintenance lives in `ancestry`; callers pair
//! the two inside one transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::ledger::physical_file_from_row;
use super::sqlite::{format_datetime, map_constraint, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{NewResource, OwnerSummary, Resource, ResourceEntry};

const COLUMNS: &str = "r.id, r.owner_id, r.parent_id, r.name, r.kind, r.physical_file_id, \
                       r.is_public, r.share_token, r.created_at, r.updated_at";

const ENTRY_SELECT: &str = "SELECT r.id, r.owner_id, r.parent_id, r.name, r.kind, r.physical_file_id,
        r.is_public, r.share_token, r.created_at, r.updated_at,
        u.id, u.username, u.email,
        p.id, p.hash, p.blob_path, p.size_bytes, p.content_type, p.reference_count, p.created_at
 FROM resources r
 JOIN users u ON u.id = r.owner_id
 LEFT JOIN physical_files p ON p.id = r.physical_file_id";

// Folders first, then by name
const ENTRY_ORDER: &str = "ORDER BY r.kind DESC, r.name, r.id";

/// A file somewhere under a subtree root, with the bytes it accounts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeFile {
    pub resource_id: i64,
    pub owner_id: i64,
    pub physical_file_id: i64,
    pub size_bytes: i64,
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        kind: row.get(4)?,
        physical_file_id: row.get(5)?,
        is_public: row.get(6)?,
        share_token: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceEntry> {
    let resource = resource_from_row(row)?;
    let owner = OwnerSummary {
        id: row.get(10)?,
        username: row.get(11)?,
        email: row.get(12)?,
    };
    let file = match row.get::<_, Option<i64>>(13)? {
        Some(_) => Some(physical_file_from_row(row, 13)?),
        None => None,
    };

    Ok(ResourceEntry {
        resource,
        owner,
        file,
    })
}

/// Inserts a resource with a fresh share token. Closure rows are not written.
pub fn create(conn: &Connection, resource: &NewResource) -> Result<Resource> {
    let now = format_datetime(&Utc::now());
    let share_token = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO resources (owner_id, parent_id, name, kind, physical_file_id, is_public, share_token, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
        params![
            resource.owner_id,
            resource.parent_id,
            resource.name,
            resource.kind,
            resource.physical_file_id,
            share_token,
            now,
        ],
    )
    .map_err(|e| map_constraint(e, || format!("Resource '{}' could not be created", resource.name)))?;

    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| Error::not_found(format!("resource {id}")))
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Resource>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM resources r WHERE r.id = ?1"),
        params![id],
        resource_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn get_by_share_token(conn: &Connection, token: &str) -> Result<Option<Resource>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM resources r WHERE r.share_token = ?1"),
        params![token],
        resource_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<ResourceEntry>> {
    conn.query_row(
        &format!("{ENTRY_SELECT} WHERE r.id = ?1"),
        params![id],
        entry_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn list_children(conn: &Connection, parent_id: i64) -> Result<Vec<ResourceEntry>> {
    let mut stmt = conn.prepare(&format!(
        "{ENTRY_SELECT} WHERE r.parent_id = ?1 {ENTRY_ORDER}"
    ))?;
    let rows = stmt.query_map(params![parent_id], entry_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn list_roots(conn: &Connection, owner_id: i64) -> Result<Vec<ResourceEntry>> {
    let mut stmt = conn.prepare(&format!(
        "{ENTRY_SELECT} WHERE r.owner_id = ?1 AND r.parent_id IS NULL {ENTRY_ORDER}"
    ))?;
    let rows = stmt.query_map(params![owner_id], entry_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub fn rename(conn: &Connection, id: i64, name: &str) -> Result<()> {
    let rows = conn.execute(
        "UPDATE resources SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, format_datetime(&Utc::now()), id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("resource {id}")));
    }
    Ok(())
}

pub fn set_parent(conn: &Connection, id: i64, parent_id: Option<i64>) -> Result<()> {
    let rows = conn.execute(
        "UPDATE resources SET parent_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![parent_id, format_datetime(&Utc::now()), id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("resource {id}")));
    }
    Ok(())
}

pub fn set_public(conn: &Connection, id: i64, is_public: bool) -> Result<()> {
    let rows = conn.execute(
        "UPDATE resources SET is_public = ?1, updated_at = ?2 WHERE id = ?3",
        params![is_public, format_datetime(&Utc::now()), id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("resource {id}")));
    }
    Ok(())
}

/// Deletes the row; descendants, permissions and closure rows cascade.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM resources WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Every file in the subtree rooted at `id`, the root included.
pub fn subtree_files(conn: &Connection, id: i64) -> Result<Vec<SubtreeFile>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.owner_id, p.id, p.size_bytes
         FROM resource_ancestors a
         JOIN resources r ON r.id = a.descendant_id
         JOIN physical_files p ON p.id = r.physical_file_id
         WHERE a.ancestor_id = ?1
         ORDER BY r.id",
    )?;

    let rows = stmt.query_map(params![id], |row| {
        Ok(SubtreeFile {
            resource_id: row.get(0)?,
            owner_id: row.get(1)?,
            physical_file_id: row.get(2)?,
            size_bytes: row.get(3)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// True when `id` or any of its ancestors carries the public flag.
pub fn has_public_ancestor(conn: &Connection, id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM resource_ancestors a
             JOIN resources r ON r.id = a.ancestor_id
             WHERE a.descendant_id = ?1 AND r.is_public = 1
         )",
        params![id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}
