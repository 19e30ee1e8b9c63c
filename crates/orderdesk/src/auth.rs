//! Roles, permissions and the acting user.
//!
//! Every service operation receives an [`Actor`] explicitly; nothing reads a
//! "current user" from ambient state.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::user_repo::UserRow;

/// Order-management permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "view:orders")]
    ViewOrders,
    #[serde(rename = "create:orders")]
    CreateOrders,
    #[serde(rename = "edit:orders")]
    EditOrders,
    #[serde(rename = "delete:orders")]
    DeleteOrders,
    #[serde(rename = "view:files")]
    ViewFiles,
    #[serde(rename = "create:files")]
    CreateFiles,
    #[serde(rename = "edit:files")]
    EditFiles,
    #[serde(rename = "delete:files")]
    DeleteFiles,
    #[serde(rename = "view:claims")]
    ViewClaims,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::ViewOrders,
        Permission::CreateOrders,
        Permission::EditOrders,
        Permission::DeleteOrders,
        Permission::ViewFiles,
        Permission::CreateFiles,
        Permission::EditFiles,
        Permission::DeleteFiles,
        Permission::ViewClaims,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewOrders => "view:orders",
            Permission::CreateOrders => "create:orders",
            Permission::EditOrders => "edit:orders",
            Permission::DeleteOrders => "delete:orders",
            Permission::ViewFiles => "view:files",
            Permission::CreateFiles => "create:files",
            Permission::EditFiles => "edit:files",
            Permission::DeleteFiles => "delete:files",
            Permission::ViewClaims => "view:claims",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User roles. Admins hold every permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Permissions granted to the role by default.
    pub fn default_permissions(&self) -> BTreeSet<Permission> {
        match self {
            Role::Admin => Permission::ALL.into_iter().collect(),
            Role::User => [
                Permission::ViewOrders,
                Permission::ViewFiles,
                Permission::EditFiles,
                Permission::ViewClaims,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name outside the known set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// The actor lacks a permission required by an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("user {user_id} lacks permission '{permission}'")]
pub struct AccessDenied {
    pub user_id: i64,
    pub permission: Permission,
}

/// The user performing an operation, with resolved permissions.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
    permissions: BTreeSet<Permission>,
}

impl Actor {
    /// Creates an actor holding the role's default permissions.
    pub fn new(user_id: i64, role: Role) -> Self {
        Self {
            user_id,
            role,
            permissions: role.default_permissions(),
        }
    }

    /// Creates an actor with an explicit permission set.
    pub fn with_permissions(
        user_id: i64,
        role: Role,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            user_id,
            role,
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn from_user(user: &UserRow) -> Self {
        Self::new(user.id, user.role)
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Whether the actor may work on a file assigned to `assignee`: the
    /// assignee, or anyone allowed to edit orders.
    pub fn may_handle(&self, assignee: Option<i64>) -> bool {
        assignee == Some(self.user_id) || self.can(Permission::EditOrders)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AccessDenied> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(AccessDenied {
                user_id: self.user_id,
                permission,
            })
        }
    }
}
