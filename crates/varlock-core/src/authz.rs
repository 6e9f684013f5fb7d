//! Project-role resolution and permission mapping.
//!
//! A caller's access to a project resolves through two independent layers:
//!
//! 1. **Project role** — `owner` (implicit, from the project's owner id,
//!    never stored in the membership table), `editor`, or `viewer` (stored
//!    memberships). Resolved by [`RoleSnapshot::resolve`].
//! 2. **Per-secret grants** — a share row that makes exactly one secret
//!    visible to a user who holds *no* project role. Grants never elevate
//!    to a project role; the storage layer checks them separately.
//!
//! Resolution is a pure function over an immutable snapshot so it can be
//! unit-tested without a database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A project-wide role, in decreasing order of privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The project owner. Derived from `Project.owner_id`, never stored as
    /// a membership row.
    Owner,
    /// Read/write collaborator.
    Editor,
    /// Read-only collaborator.
    Viewer,
}

impl Role {
    /// Permissions granted by this role.
    #[must_use]
    pub const fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Owner | Self::Editor => &[Permission::Read, Permission::Write],
            Self::Viewer => &[Permission::Read],
        }
    }

    /// Whether this role may mutate project state (secrets, members,
    /// project settings).
    #[must_use]
    pub const fn can_write(self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Editor => write!(f, "editor"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single capability on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Permissions for an optional role. `None` (no project-wide role) maps to
/// the empty set.
#[must_use]
pub fn permissions_for(role: Option<Role>) -> &'static [Permission] {
    role.map_or(&[], Role::permissions)
}

/// Immutable view of a project's membership, sufficient to resolve any
/// user's role.
#[derive(Debug, Clone)]
pub struct RoleSnapshot<'a> {
    /// The project's owner.
    pub owner_id: Uuid,
    /// Stored memberships (`editor` / `viewer` rows).
    pub members: &'a [(Uuid, Role)],
}

impl RoleSnapshot<'_> {
    /// Resolve a user's project role.
    ///
    /// Owner precedence is absolute: if the user is the owner, any
    /// conflicting membership row is ignored. Per-secret shares are
    /// deliberately invisible here — they never grant a project role.
    #[must_use]
    pub fn resolve(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.owner_id {
            return Some(Role::Owner);
        }
        self.members
            .iter()
            .find(|(member_id, _)| *member_id == user_id)
            .map(|(_, role)| *role)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn owner_resolves_from_project_owner_id() {
        let snapshot = RoleSnapshot {
            owner_id: uid(1),
            members: &[],
        };
        assert_eq!(snapshot.resolve(uid(1)), Some(Role::Owner));
    }

    #[test]
    fn owner_precedence_beats_conflicting_membership_row() {
        // The invariant says the owner is never in the members table, but
        // resolution must still prefer owner if a stray row exists.
        let members = [(uid(1), Role::Viewer)];
        let snapshot = RoleSnapshot {
            owner_id: uid(1),
            members: &members,
        };
        assert_eq!(snapshot.resolve(uid(1)), Some(Role::Owner));
    }

    #[test]
    fn member_resolves_to_stored_role() {
        let members = [(uid(2), Role::Editor), (uid(3), Role::Viewer)];
        let snapshot = RoleSnapshot {
            owner_id: uid(1),
            members: &members,
        };
        assert_eq!(snapshot.resolve(uid(2)), Some(Role::Editor));
        assert_eq!(snapshot.resolve(uid(3)), Some(Role::Viewer));
    }

    #[test]
    fn stranger_resolves_to_none() {
        let members = [(uid(2), Role::Editor)];
        let snapshot = RoleSnapshot {
            owner_id: uid(1),
            members: &members,
        };
        assert_eq!(snapshot.resolve(uid(9)), None);
    }

    #[test]
    fn permission_mapping() {
        assert_eq!(
            Role::Owner.permissions(),
            &[Permission::Read, Permission::Write]
        );
        assert_eq!(
            Role::Editor.permissions(),
            &[Permission::Read, Permission::Write]
        );
        assert_eq!(Role::Viewer.permissions(), &[Permission::Read]);
        assert!(permissions_for(None).is_empty());
        assert_eq!(permissions_for(Some(Role::Viewer)), &[Permission::Read]);
    }

    #[test]
    fn write_gate() {
        assert!(Role::Owner.can_write());
        assert!(Role::Editor.can_write());
        assert!(!Role::Viewer.can_write());
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Owner, Role::Editor, Role::Viewer] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("admin".parse::<Role>().is_err());
    }
}
