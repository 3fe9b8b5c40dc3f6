//! Static role → permission model.
//!
//! Pure and synchronous. Permission identifiers have the form
//! `resource:action`. The `admin` role is computed as the whole catalog,
//! so adding a permission grants it to admin without further edits.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub resource: &'static str,
    pub action: &'static str,
}

const fn perm(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    resource: &'static str,
    action: &'static str,
) -> Permission {
    Permission {
        id,
        name,
        description,
        resource,
        action,
    }
}

pub static PERMISSIONS: &[Permission] = &[
    // User
    perm("cheat:view", "View Cheats", "Can view available cheats", "cheat", "view"),
    perm("cheat:launch", "Launch Cheats", "Can launch cheats", "cheat", "launch"),
    perm("license:view", "View Licenses", "Can view own licenses", "license", "view"),
    perm("license:add", "Add Licenses", "Can add licenses to account", "license", "add"),
    // Reseller
    perm("cheat:manage", "Manage Cheats", "Can manage cheat status and settings", "cheat", "manage"),
    perm("user:view", "View Users", "Can view user accounts", "user", "view"),
    perm("license:manage", "Manage Licenses", "Can create and manage licenses", "license", "manage"),
    perm("sales:view", "View Sales", "Can view sales data", "sales", "view"),
    // Developer
    perm("cheat:create", "Create Cheats", "Can create new cheats", "cheat", "create"),
    perm("cheat:delete", "Delete Cheats", "Can delete cheats", "cheat", "delete"),
    perm("reseller:manage", "Manage Resellers", "Can manage reseller accounts", "reseller", "manage"),
    perm("system:settings", "System Settings", "Can modify system settings", "system", "settings"),
    // Admin
    perm("user:manage", "Manage Users", "Can manage all user accounts", "user", "manage"),
    perm("role:manage", "Manage Roles", "Can manage user roles and permissions", "role", "manage"),
    perm("system:admin", "System Administration", "Full system administration access", "system", "admin"),
];

const USER_PERMISSIONS: &[&str] = &["cheat:view", "cheat:launch", "license:view", "license:add"];

const RESELLER_PERMISSIONS: &[&str] = &[
    "cheat:view",
    "cheat:launch",
    "cheat:manage",
    "license:view",
    "license:add",
    "license:manage",
    "user:view",
    "sales:view",
];

const DEVELOPER_PERMISSIONS: &[&str] = &[
    "cheat:view",
    "cheat:launch",
    "cheat:manage",
    "cheat:create",
    "cheat:delete",
    "license:view",
    "license:add",
    "license:manage",
    "user:view",
    "reseller:manage",
    "system:settings",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Reseller,
    Developer,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Reseller, Role::Developer, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Reseller => "reseller",
            Role::Developer => "developer",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == s)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Reseller => "Reseller",
            Role::Developer => "Developer",
            Role::Admin => "Administrator",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::User => "Standard user with basic access",
            Role::Reseller => "Reseller with management capabilities",
            Role::Developer => "Developer with full catalog management",
            Role::Admin => "Full system administrator",
        }
    }

    /// Canonical permission set for this role in the standard table.
    pub fn permissions(&self) -> &'static BTreeSet<String> {
        ROLES.permissions(*self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role → permission table built from a catalog.
#[derive(Debug, Clone)]
pub struct RoleTable {
    grants: BTreeMap<Role, BTreeSet<String>>,
}

impl RoleTable {
    /// Build the table. `admin` receives every identifier in `catalog`.
    pub fn from_catalog(catalog: &[Permission]) -> Self {
        let list = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();

        let mut grants = BTreeMap::new();
        grants.insert(Role::User, list(USER_PERMISSIONS));
        grants.insert(Role::Reseller, list(RESELLER_PERMISSIONS));
        grants.insert(Role::Developer, list(DEVELOPER_PERMISSIONS));
        grants.insert(
            Role::Admin,
            catalog.iter().map(|p| p.id.to_string()).collect(),
        );
        Self { grants }
    }

    pub fn permissions(&self, role: Role) -> &BTreeSet<String> {
        // Every role is inserted by `from_catalog`
        &self.grants[&role]
    }
}

/// The standard table over [`PERMISSIONS`].
pub static ROLES: Lazy<RoleTable> = Lazy::new(|| RoleTable::from_catalog(PERMISSIONS));

/// Identity/permission snapshot carried by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSnapshot {
    pub role: Role,
    pub permissions: BTreeSet<String>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionSnapshot {
    /// Active, non-expiring snapshot with the role's canonical permissions.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            permissions: role.permissions().clone(),
            is_active: true,
            expires_at: None,
        }
    }
}

impl Default for PermissionSnapshot {
    fn default() -> Self {
        Self::for_role(Role::User)
    }
}

pub fn find_permission(id: &str) -> Option<&'static Permission> {
    PERMISSIONS.iter().find(|p| p.id == id)
}

pub fn role_permissions(role: Role) -> &'static BTreeSet<String> {
    role.permissions()
}

pub fn has_permission(snapshot: &PermissionSnapshot, permission_id: &str) -> bool {
    has_permission_at(snapshot, permission_id, Utc::now())
}

/// Inactive or expired snapshots hold no permissions.
pub fn has_permission_at(
    snapshot: &PermissionSnapshot,
    permission_id: &str,
    now: DateTime<Utc>,
) -> bool {
    if !snapshot.is_active {
        return false;
    }
    if let Some(expires_at) = snapshot.expires_at
        && expires_at < now
    {
        return false;
    }
    snapshot.permissions.contains(permission_id)
}

pub fn can_access_resource(snapshot: &PermissionSnapshot, resource: &str, action: &str) -> bool {
    has_permission(snapshot, &format!("{}:{}", resource, action))
}

pub fn has_role(snapshot: &PermissionSnapshot, role: Role) -> bool {
    snapshot.role == role
}
