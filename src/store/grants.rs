use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::sqlite::{format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{Permission, Role};

/// The strongest role a user holds on any proper ancestor of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritedGrant {
    pub role: Role,
    pub ancestor_id: i64,
    pub depth: i64,
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        resource_id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

/// Sets the user's role on the resource, replacing any existing role.
pub fn upsert(conn: &Connection, resource_id: i64, user_id: i64, role: Role) -> Result<()> {
    conn.execute(
        "INSERT INTO permissions (resource_id, user_id, role, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (resource_id, user_id) DO UPDATE SET role = excluded.role",
        params![resource_id, user_id, role, format_datetime(&Utc::now())],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, resource_id: i64, user_id: i64) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM permissions WHERE resource_id = ?1 AND user_id = ?2",
        params![resource_id, user_id],
    )?;
    Ok(rows > 0)
}

pub fn get(conn: &Connection, resource_id: i64, user_id: i64) -> Result<Option<Permission>> {
    conn.query_row(
        "SELECT resource_id, user_id, role, created_at FROM permissions
         WHERE resource_id = ?1 AND user_id = ?2",
        params![resource_id, user_id],
        permission_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub fn list_for_resource(conn: &Connection, resource_id: i64) -> Result<Vec<Permission>> {
    let mut stmt = conn.prepare(
        "SELECT resource_id, user_id, role, created_at FROM permissions
         WHERE resource_id = ?1 ORDER BY user_id",
    )?;
    let rows = stmt.query_map(params![resource_id], permission_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Highest role granted to `user_id` on a proper ancestor of `resource_id`.
/// Equal roles resolve to the nearest ancestor.
pub fn strongest_inherited(
    conn: &Connection,
    resource_id: i64,
    user_id: i64,
) -> Result<Option<InheritedGrant>> {
    let mut stmt = conn.prepare(
        "SELECT p.role, a.ancestor_id, a.depth
         FROM resource_ancestors a
         JOIN permissions p ON p.resource_id = a.ancestor_id
         WHERE a.descendant_id = ?1 AND a.depth > 0 AND p.user_id = ?2",
    )?;
    let rows = stmt.query_map(params![resource_id, user_id], |row| {
        Ok(InheritedGrant {
            role: row.get(0)?,
            ancestor_id: row.get(1)?,
            depth: row.get(2)?,
        })
    })?;

    let mut best: Option<InheritedGrant> = None;
    for row in rows {
        let grant = row?;
        let better = match best {
            None => true,
            Some(current) => {
                grant.role > current.role || (grant.role == current.role && grant.depth < current.depth)
            }
        };
        if better {
            best = Some(grant);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store, ancestry, tree, users};
    use crate::types::{NewResource, NewUser, ResourceKind};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn user(conn: &Connection, name: &str) -> i64 {
        users::create(
            conn,
            &NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                storage_quota_bytes: None,
            },
        )
        .unwrap()
        .id
    }

    fn folder(conn: &Connection, owner_id: i64, parent_id: Option<i64>, name: &str) -> i64 {
        let resource = tree::create(
            conn,
            &NewResource {
                owner_id,
                parent_id,
                name: name.to_string(),
                kind: ResourceKind::Folder,
                physical_file_id: None,
            },
        )
        .unwrap();
        ancestry::attach(conn, resource.id, parent_id).unwrap();
        resource.id
    }

    #[test]
    fn test_upsert_replaces_role() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let alice = user(&conn, "alice");
        let bob = user(&conn, "bob");
        let docs = folder(&conn, alice, None, "docs");

        upsert(&conn, docs, bob, Role::Viewer).unwrap();
        assert_eq!(get(&conn, docs, bob).unwrap().unwrap().role, Role::Viewer);

        upsert(&conn, docs, bob, Role::Editor).unwrap();
        assert_eq!(get(&conn, docs, bob).unwrap().unwrap().role, Role::Editor);
        assert_eq!(list_for_resource(&conn, docs).unwrap().len(), 1);

        assert!(delete(&conn, docs, bob).unwrap());
        assert!(!delete(&conn, docs, bob).unwrap());
        assert!(get(&conn, docs, bob).unwrap().is_none());
    }

    #[test]
    fn test_strongest_inherited_prefers_role_then_depth() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let alice = user(&conn, "alice");
        let bob = user(&conn, "bob");

        let root = folder(&conn, alice, None, "root");
        let middle = folder(&conn, alice, Some(root), "middle");
        let near = folder(&conn, alice, Some(middle), "near");
        let leaf = folder(&conn, alice, Some(near), "leaf");

        assert!(strongest_inherited(&conn, leaf, bob).unwrap().is_none());

        upsert(&conn, near, bob, Role::Viewer).unwrap();
        upsert(&conn, root, bob, Role::Editor).unwrap();
        let best = strongest_inherited(&conn, leaf, bob).unwrap().unwrap();
        assert_eq!(best.role, Role::Editor);
        assert_eq!(best.ancestor_id, root);
        assert_eq!(best.depth, 3);

        upsert(&conn, middle, bob, Role::Editor).unwrap();
        let best = strongest_inherited(&conn, leaf, bob).unwrap().unwrap();
        assert_eq!(best.ancestor_id, middle);
        assert_eq!(best.depth, 2);
    }

    #[test]
    fn test_strongest_inherited_ignores_own_row() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let alice = user(&conn, "alice");
        let bob = user(&conn, "bob");
        let docs = folder(&conn, alice, None, "docs");

        upsert(&conn, docs, bob, Role::Editor).unwrap();
        assert!(strongest_inherited(&conn, docs, bob).unwrap().is_none());
    }
}
