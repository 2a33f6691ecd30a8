use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::{format_datetime, map_constraint, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{NewUser, User};

const COLUMNS: &str =
    "id, username, email, storage_quota_bytes, storage_used_bytes, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        storage_quota_bytes: row.get(3)?,
        storage_used_bytes: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

pub fn create(conn: &Connection, user: &NewUser) -> Result<User> {
    conn.execute(
        "INSERT INTO users (username, email, storage_quota_bytes, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            user.username,
            user.email,
            user.storage_quota_bytes,
            format_datetime(&Utc::now()),
        ],
    )
    .map_err(|e| {
        map_constraint(e, || {
            format!(
                "User '{}' or email '{}' already exists",
                user.username, user.email
            )
        })
    })?;

    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| Error::not_found(format!("user {id}")))
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn get_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM users WHERE email = ?1"),
        params![email],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn list(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users ORDER BY id"))?;
    let rows = stmt.query_map([], user_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Adds `delta` (possibly negative) to the user's logical usage, never going
/// below zero.
pub fn adjust_storage_used(conn: &Connection, id: i64, delta: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE users SET storage_used_bytes = MAX(storage_used_bytes + ?1, 0) WHERE id = ?2",
        params![delta, id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("user {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            storage_quota_bytes: None,
        }
    }

    #[test]
    fn test_user_crud() {
        let (_temp, store) = test_store();
        let conn = store.connection();

        let alice = create(&conn, &new_user("alice")).unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.storage_used_bytes, 0);
        assert_eq!(alice.storage_quota_bytes, None);

        let fetched = get(&conn, alice.id).unwrap().unwrap();
        assert_eq!(fetched.email, "alice@example.com");

        let by_email = get_by_email(&conn, "alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, alice.id);

        assert!(get(&conn, 999).unwrap().is_none());
        assert!(get_by_email(&conn, "nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let (_temp, store) = test_store();
        let conn = store.connection();

        create(&conn, &new_user("alice")).unwrap();
        let dup = NewUser {
            username: "alice2".to_string(),
            email: "alice@example.com".to_string(),
            storage_quota_bytes: None,
        };
        assert!(matches!(create(&conn, &dup), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_adjust_storage_used_clamps_at_zero() {
        let (_temp, store) = test_store();
        let conn = store.connection();

        let alice = create(&conn, &new_user("alice")).unwrap();
        adjust_storage_used(&conn, alice.id, 100).unwrap();
        adjust_storage_used(&conn, alice.id, -30).unwrap();
        assert_eq!(get(&conn, alice.id).unwrap().unwrap().storage_used_bytes, 70);

        adjust_storage_used(&conn, alice.id, -500).unwrap();
        assert_eq!(get(&conn, alice.id).unwrap().unwrap().storage_used_bytes, 0);

        assert!(matches!(
            adjust_storage_used(&conn, 999, 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_users_in_creation_order() {
        let (_temp, store) = test_store();
        let conn = store.connection();

        create(&conn, &new_user("alice")).unwrap();
        create(&conn, &new_user("bob")).unwrap();

        let names: Vec<String> = list(&conn).unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
