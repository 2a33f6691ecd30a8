//! Physical-file ledger: one row per unique hash, counting the resources that
//! point at it.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::{format_datetime, map_constraint, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{NewPhysicalFile, PhysicalFile, StorageStats};

const COLUMNS: &str = "id, hash, blob_path, size_bytes, content_type, reference_count, created_at";

pub(crate) fn physical_file_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<PhysicalFile> {
    Ok(PhysicalFile {
        id: row.get(offset)?,
        hash: row.get(offset + 1)?,
        blob_path: row.get(offset + 2)?,
        size_bytes: row.get(offset + 3)?,
        content_type: row.get(offset + 4)?,
        reference_count: row.get(offset + 5)?,
        created_at: parse_datetime(&row.get::<_, String>(offset + 6)?),
    })
}

pub fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<PhysicalFile>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM physical_files WHERE hash = ?1"),
        params![hash],
        |row| physical_file_from_row(row, 0),
    )
    .optional()
    .map_err(Error::from)
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<PhysicalFile>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM physical_files WHERE id = ?1"),
        params![id],
        |row| physical_file_from_row(row, 0),
    )
    .optional()
    .map_err(Error::from)
}

/// Inserts a ledger row with a reference count of one.
///
/// Returns `Conflict` when another writer already recorded the same hash.
pub fn create(conn: &Connection, file: &NewPhysicalFile) -> Result<PhysicalFile> {
    conn.execute(
        "INSERT INTO physical_files (hash, blob_path, size_bytes, content_type, reference_count, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![
            file.hash,
            file.blob_path,
            file.size_bytes,
            file.content_type,
            format_datetime(&Utc::now()),
        ],
    )
    .map_err(|e| map_constraint(e, || format!("Content {} is already recorded", file.hash)))?;

    let id = conn.last_insert_rowid();
    find_by_id(conn, id)?.ok_or_else(|| Error::not_found(format!("physical file {id}")))
}

pub fn increment(conn: &Connection, id: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE physical_files SET reference_count = reference_count + 1 WHERE id = ?1",
        params![id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("physical file {id}")));
    }
    Ok(())
}

/// Decrements the reference count and returns the new value.
pub fn decrement(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row(
        "UPDATE physical_files SET reference_count = reference_count - 1
         WHERE id = ?1 RETURNING reference_count",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("physical file {id}")))
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute("DELETE FROM physical_files WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub fn list(conn: &Connection) -> Result<Vec<PhysicalFile>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM physical_files ORDER BY id"))?;
    let rows = stmt.query_map([], |row| physical_file_from_row(row, 0))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Physical bytes are summed over ledger rows; logical bytes over file
/// resources, so duplicates count once per resource.
pub fn stats(conn: &Connection) -> Result<StorageStats> {
    let (unique_files, physical_bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM physical_files",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let logical_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(p.size_bytes), 0)
         FROM resources r JOIN physical_files p ON p.id = r.physical_file_id",
        [],
        |row| row.get(0),
    )?;

    Ok(StorageStats {
        unique_files,
        physical_bytes,
        logical_bytes,
        saved_bytes: (logical_bytes - physical_bytes).max(0),
    })
}
