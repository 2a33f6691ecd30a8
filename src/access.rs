use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::{grants, tree};
use crate::types::{Resource, Role};

/// How a caller reached a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Access {
    /// A permission row on the resource itself, or ownership.
    Direct { role: Role },
    /// The strongest grant on a proper ancestor.
    Inherited { role: Role, ancestor_id: i64 },
    /// The resource or one of its ancestors is public.
    Public,
}

impl Access {
    /// Role held through a grant. Public access carries none.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Access::Direct { role } | Access::Inherited { role, .. } => Some(*role),
            Access::Public => None,
        }
    }
}

/// Resolves what `user_id` may do with `resource`.
///
/// Order: ownership and a direct row, then the strongest inherited grant, then
/// the public flag on the resource or any ancestor. `None` means deny.
/// Anonymous callers (`user_id == None`) only ever get `Public`.
pub fn check_access(
    conn: &Connection,
    resource: &Resource,
    user_id: Option<i64>,
) -> Result<Option<Access>> {
    if let Some(user_id) = user_id {
        if resource.owner_id == user_id {
            return Ok(Some(Access::Direct { role: Role::Editor }));
        }

        if let Some(permission) = grants::get(conn, resource.id, user_id)? {
            return Ok(Some(Access::Direct {
                role: permission.role,
            }));
        }

        if let Some(inherited) = grants::strongest_inherited(conn, resource.id, user_id)? {
            return Ok(Some(Access::Inherited {
                role: inherited.role,
                ancestor_id: inherited.ancestor_id,
            }));
        }
    }

    if tree::has_public_ancestor(conn, resource.id)? {
        return Ok(Some(Access::Public));
    }

    Ok(None)
}

/// Check access, returning `AccessDenied` if there is none.
pub fn require_access(
    conn: &Connection,
    resource: &Resource,
    user_id: Option<i64>,
) -> Result<Access> {
    check_access(conn, resource, user_id)?.ok_or(Error::AccessDenied)
}

/// True when the resource or any ancestor carries the public flag.
pub fn is_public(conn: &Connection, resource: &Resource) -> Result<bool> {
    if resource.is_public {
        return Ok(true);
    }
    tree::has_public_ancestor(conn, resource.id)
}

/// Structural changes are reserved for the owner; an editor grant does not
/// extend to them.
pub fn require_owner(resource: &Resource, user_id: i64, action: &str) -> Result<()> {
    if resource.owner_id != user_id {
        return Err(Error::unauthorized(format!(
            "Only the owner can {action} resource {}",
            resource.id
        )));
    }
    Ok(())
}
