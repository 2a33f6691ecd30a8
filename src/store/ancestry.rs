//! Closure table over the resource tree.
//!
//! `resource_ancestors` holds one row per (ancestor, descendant) pair with the
//! number of edges between them. The table is inclusive: every resource has a
//! depth-0 row pointing at itself. Rows are kept in step with `parent_id` by
//! the same transaction that changes the tree.

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::AncestorLink;

/// Guards the parent walk against a corrupt (cyclic) parent chain.
const MAX_WALK_DEPTH: i64 = 4096;

const PARENT_CHAIN: &str = "WITH RECURSIVE chain(ancestor_id, descendant_id, depth) AS (
     SELECT id, id, 0 FROM resources
     UNION ALL
     SELECT r.parent_id, chain.descendant_id, chain.depth + 1
     FROM chain JOIN resources r ON r.id = chain.ancestor_id
     WHERE r.parent_id IS NOT NULL AND chain.depth < 4096
 )";

/// Rows missing from, or left over in, the closure table relative to the
/// parent pointers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexDrift {
    pub missing: i64,
    pub stale: i64,
}

impl IndexDrift {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.stale == 0
    }
}

/// Writes closure rows for a freshly created leaf: the self row plus one row
/// per ancestor of `parent_id`.
pub fn attach(conn: &Connection, id: i64, parent_id: Option<i64>) -> Result<()> {
    conn.execute(
        "INSERT INTO resource_ancestors (ancestor_id, descendant_id, depth) VALUES (?1, ?1, 0)",
        params![id],
    )?;

    if let Some(parent_id) = parent_id {
        conn.execute(
            "INSERT INTO resource_ancestors (ancestor_id, descendant_id, depth)
             SELECT ancestor_id, ?1, depth + 1 FROM resource_ancestors WHERE descendant_id = ?2",
            params![id, parent_id],
        )?;
    }
    Ok(())
}

/// Re-homes the subtree rooted at `id` under `new_parent_id`.
///
/// Rows linking the subtree to its old outside ancestors are dropped, then the
/// cross product of the new parent's ancestors and the subtree is inserted.
/// Rows inside the subtree are untouched. Returns the number of rows inserted.
pub fn relink_subtree(conn: &Connection, id: i64, new_parent_id: Option<i64>) -> Result<usize> {
    conn.execute(
        "DELETE FROM resource_ancestors
         WHERE descendant_id IN (SELECT descendant_id FROM resource_ancestors WHERE ancestor_id = ?1)
           AND ancestor_id NOT IN (SELECT descendant_id FROM resource_ancestors WHERE ancestor_id = ?1)",
        params![id],
    )?;

    let Some(new_parent_id) = new_parent_id else {
        return Ok(0);
    };

    let inserted = conn.execute(
        "INSERT INTO resource_ancestors (ancestor_id, descendant_id, depth)
         SELECT sup.ancestor_id, sub.descendant_id, sup.depth + sub.depth + 1
         FROM resource_ancestors sup
         JOIN resource_ancestors sub ON sub.ancestor_id = ?1
         WHERE sup.descendant_id = ?2",
        params![id, new_parent_id],
    )?;
    Ok(inserted)
}

/// Proper ancestors of `id`, nearest first.
pub fn ancestors(conn: &Connection, id: i64) -> Result<Vec<AncestorLink>> {
    let mut stmt = conn.prepare(
        "SELECT ancestor_id, descendant_id, depth FROM resource_ancestors
         WHERE descendant_id = ?1 AND depth > 0
         ORDER BY depth",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(AncestorLink {
            ancestor_id: row.get(0)?,
            descendant_id: row.get(1)?,
            depth: row.get(2)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// True when `node_id` is `root_id` or lies anywhere beneath it.
pub fn is_within_subtree(conn: &Connection, root_id: i64, node_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM resource_ancestors WHERE ancestor_id = ?1 AND descendant_id = ?2
         )",
        params![root_id, node_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

/// Number of resources in the subtree rooted at `id`, the root included.
pub fn subtree_size(conn: &Connection, id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM resource_ancestors WHERE ancestor_id = ?1",
        params![id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

/// Proper ancestors of `id` found by following `parent_id`, nearest first.
/// Independent of the closure table, so it can be used to check it.
pub fn parent_walk(conn: &Connection, id: i64) -> Result<Vec<AncestorLink>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE walk(ancestor_id, depth) AS (
             SELECT parent_id, 1 FROM resources WHERE id = ?1 AND parent_id IS NOT NULL
             UNION ALL
             SELECT r.parent_id, walk.depth + 1
             FROM walk JOIN resources r ON r.id = walk.ancestor_id
             WHERE r.parent_id IS NOT NULL AND walk.depth < ?2
         )
         SELECT ancestor_id, depth FROM walk ORDER BY depth",
    )?;
    let rows = stmt.query_map(params![id, MAX_WALK_DEPTH], |row| {
        Ok(AncestorLink {
            ancestor_id: row.get(0)?,
            descendant_id: id,
            depth: row.get(1)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Compares the closure table with what the parent pointers imply.
pub fn drift(conn: &Connection) -> Result<IndexDrift> {
    let missing: i64 = conn.query_row(
        &format!(
            "{PARENT_CHAIN}
             SELECT COUNT(*) FROM (
                 SELECT ancestor_id, descendant_id, depth FROM chain
                 EXCEPT
                 SELECT ancestor_id, descendant_id, depth FROM resource_ancestors
             )"
        ),
        [],
        |row| row.get(0),
    )?;

    let stale: i64 = conn.query_row(
        &format!(
            "{PARENT_CHAIN}
             SELECT COUNT(*) FROM (
                 SELECT ancestor_id, descendant_id, depth FROM resource_ancestors
                 EXCEPT
                 SELECT ancestor_id, descendant_id, depth FROM chain
             )"
        ),
        [],
        |row| row.get(0),
    )?;

    Ok(IndexDrift { missing, stale })
}

/// Discards the closure table and recomputes it from parent pointers.
/// Returns the number of rows written.
pub fn rebuild(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM resource_ancestors", [])?;
    let rows = conn.execute(
        &format!(
            "{PARENT_CHAIN}
             INSERT INTO resource_ancestors (ancestor_id, descendant_id, depth)
             SELECT ancestor_id, descendant_id, depth FROM chain"
        ),
        [],
    )?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store, tree, users};
    use crate::types::{NewResource, NewUser, ResourceKind};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn owner(conn: &Connection) -> i64 {
        users::create(
            conn,
            &NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
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
        attach(conn, resource.id, parent_id).unwrap();
        resource.id
    }

    fn ancestor_ids(conn: &Connection, id: i64) -> Vec<(i64, i64)> {
        ancestors(conn, id)
            .unwrap()
            .into_iter()
            .map(|l| (l.ancestor_id, l.depth))
            .collect()
    }

    fn walk_ids(conn: &Connection, id: i64) -> Vec<(i64, i64)> {
        parent_walk(conn, id)
            .unwrap()
            .into_iter()
            .map(|l| (l.ancestor_id, l.depth))
            .collect()
    }

    #[test]
    fn test_attach_writes_self_and_ancestor_rows() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let user = owner(&conn);

        let a = folder(&conn, user, None, "a");
        let b = folder(&conn, user, Some(a), "b");
        let c = folder(&conn, user, Some(b), "c");

        assert_eq!(ancestor_ids(&conn, c), vec![(b, 1), (a, 2)]);
        assert!(ancestor_ids(&conn, a).is_empty());
        assert!(is_within_subtree(&conn, a, c).unwrap());
        assert!(is_within_subtree(&conn, c, c).unwrap());
        assert!(!is_within_subtree(&conn, c, a).unwrap());
        assert_eq!(subtree_size(&conn, a).unwrap(), 3);
        assert!(drift(&conn).unwrap().is_clean());
    }

    #[test]
    fn test_relink_subtree_moves_descendants() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let user = owner(&conn);

        let left = folder(&conn, user, None, "left");
        let right = folder(&conn, user, None, "right");
        let target = folder(&conn, user, Some(right), "target");
        let moved = folder(&conn, user, Some(left), "moved");
        let child = folder(&conn, user, Some(moved), "child");
        let grandchild = folder(&conn, user, Some(child), "grandchild");

        tree::set_parent(&conn, moved, Some(target)).unwrap();
        let inserted = relink_subtree(&conn, moved, Some(target)).unwrap();
        // three subtree nodes times two new ancestors
        assert_eq!(inserted, 6);

        assert_eq!(
            ancestor_ids(&conn, grandchild),
            vec![(child, 1), (moved, 2), (target, 3), (right, 4)]
        );
        assert!(!is_within_subtree(&conn, left, grandchild).unwrap());
        assert_eq!(walk_ids(&conn, grandchild), ancestor_ids(&conn, grandchild));
        assert!(drift(&conn).unwrap().is_clean());
    }

    #[test]
    fn test_relink_subtree_to_root() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let user = owner(&conn);

        let a = folder(&conn, user, None, "a");
        let b = folder(&conn, user, Some(a), "b");
        let c = folder(&conn, user, Some(b), "c");

        tree::set_parent(&conn, b, None).unwrap();
        assert_eq!(relink_subtree(&conn, b, None).unwrap(), 0);

        assert_eq!(ancestor_ids(&conn, c), vec![(b, 1)]);
        assert!(ancestor_ids(&conn, b).is_empty());
        assert!(drift(&conn).unwrap().is_clean());
    }

    #[test]
    fn test_drift_detects_and_rebuild_repairs() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let user = owner(&conn);

        let a = folder(&conn, user, None, "a");
        let b = folder(&conn, user, Some(a), "b");
        let c = folder(&conn, user, Some(b), "c");

        // Parent pointer changes without a relink
        tree::set_parent(&conn, c, Some(a)).unwrap();
        let drift_before = drift(&conn).unwrap();
        assert!(!drift_before.is_clean());

        let written = rebuild(&conn).unwrap();
        assert_eq!(written, 5);
        assert!(drift(&conn).unwrap().is_clean());
        assert_eq!(ancestor_ids(&conn, c), vec![(a, 1)]);
        assert_eq!(ancestor_ids(&conn, c), walk_ids(&conn, c));
    }

    #[test]
    fn test_deep_chain_matches_parent_walk() {
        let (_temp, store) = test_store();
        let conn = store.connection();
        let user = owner(&conn);

        let mut parent = None;
        let mut ids = Vec::new();
        for depth in 0..25 {
            let id = folder(&conn, user, parent, &format!("level-{depth}"));
            ids.push(id);
            parent = Some(id);
        }

        let leaf = *ids.last().unwrap();
        let links = ancestor_ids(&conn, leaf);
        assert_eq!(links.len(), 24);
        assert_eq!(links[0], (ids[23], 1));
        assert_eq!(links[23], (ids[0], 24));
        assert_eq!(links, walk_ids(&conn, leaf));
    }
}
