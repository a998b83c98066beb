//! Role-based access control
//!
//! Roles are named sets of privileges. An access control entry (ACE) binds
//! a subject and a role to a resource path, either allowing or denying the
//! role's privileges there and, when propagating, below it.
//!
//! The repository is split by concern:
//! - `roles`, `privileges`, `aces`: entity CRUD, one transaction per call
//! - `membership`: the role ↔ privilege association
//! - `resolver`: the privilege check
//! - `catalog`: built-in roles and privileges

mod aces;
pub mod catalog;
mod membership;
pub mod path;
mod privileges;
pub mod resolver;
mod roles;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{RbacError, Result};

pub use privileges::validate_privilege_name;
pub use resolver::{resolve, CandidateAce, Decision};

/// Which kind of subject an ACE targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AceType {
    User,
    Group,
}

impl AceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AceType::User => "user",
            AceType::Group => "group",
        }
    }
}

impl FromStr for AceType {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(AceType::User),
            "group" => Ok(AceType::Group),
            other => Err(RbacError::invalid(
                "ace_type",
                format!("unknown ACE type '{}'", other),
            )),
        }
    }
}

/// A named privilege such as `Node.PowerMgmt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub privilege_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A role with its privileges loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Built-in roles cannot be updated or deleted
    pub is_builtin: bool,
    pub created_at: String,
    pub updated_at: String,
    pub privileges: Vec<Privilege>,
}

impl Role {
    /// Check if the role includes a privilege by name
    pub fn has_privilege(&self, name: &str) -> bool {
        self.privileges.iter().any(|p| p.name == name)
    }
}

/// An access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    pub ace_id: String,
    pub path: String,
    pub ace_type: AceType,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub role_id: String,
    pub allowed: bool,
    pub propagate: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a role update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Fields for a privilege update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A new ACE. Unset `allowed`/`propagate` take the schema defaults (both true).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceCreate {
    pub path: String,
    pub ace_type: AceType,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub role_id: String,
    #[serde(default)]
    pub allowed: Option<bool>,
    #[serde(default)]
    pub propagate: Option<bool>,
}

impl AceCreate {
    /// ACE targeting a user
    pub fn for_user(path: &str, user_id: &str, role_id: &str) -> Self {
        Self {
            path: path.to_string(),
            ace_type: AceType::User,
            user_id: Some(user_id.to_string()),
            group_id: None,
            role_id: role_id.to_string(),
            allowed: None,
            propagate: None,
        }
    }

    /// ACE targeting a group
    pub fn for_group(path: &str, group_id: &str, role_id: &str) -> Self {
        Self {
            path: path.to_string(),
            ace_type: AceType::Group,
            user_id: None,
            group_id: Some(group_id.to_string()),
            role_id: role_id.to_string(),
            allowed: None,
            propagate: None,
        }
    }

    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn with_propagate(mut self, propagate: bool) -> Self {
        self.propagate = Some(propagate);
        self
    }
}

/// Fields for an ACE update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AceUpdate {
    pub path: Option<String>,
    pub role_id: Option<String>,
    pub allowed: Option<bool>,
    pub propagate: Option<bool>,
}

/// Persistence and resolution over roles, privileges and ACEs.
///
/// Holds only the injected pool; every call is its own transaction and
/// nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct RbacRepository {
    pool: SqlitePool,
    timeout: Option<Duration>,
}

impl RbacRepository {
    /// Create a repository over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            timeout: None,
        }
    }

    /// Bound every operation by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction that holds the write lock from its first
    /// statement. Concurrent writers then wait out the busy timeout instead
    /// of failing when their read snapshot goes stale.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Run an operation under the configured timeout.
    ///
    /// On expiry the operation's future is dropped, and with it any open
    /// transaction, which rolls back. An expiry while the commit itself is
    /// in flight may still report `Timeout` for a change that landed.
    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| RbacError::Timeout(limit))?,
            None => op.await,
        }
    }
}

/// Current time as stored in `created_at` / `updated_at`
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Row type for privileges queries
#[derive(sqlx::FromRow)]
struct PrivilegeRow {
    privilege_id: String,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PrivilegeRow {
    fn into_privilege(self) -> Privilege {
        Privilege {
            privilege_id: self.privilege_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Row type for roles queries
#[derive(sqlx::FromRow)]
struct RoleRow {
    role_id: String,
    name: String,
    description: Option<String>,
    is_builtin: bool,
    created_at: String,
    updated_at: String,
}

impl RoleRow {
    fn into_role(self, privileges: Vec<Privilege>) -> Role {
        Role {
            role_id: self.role_id,
            name: self.name,
            description: self.description,
            is_builtin: self.is_builtin,
            created_at: self.created_at,
            updated_at: self.updated_at,
            privileges,
        }
    }
}

/// Row type for aces queries
#[derive(sqlx::FromRow)]
struct AceRow {
    ace_id: String,
    path: String,
    ace_type: String,
    user_id: Option<String>,
    group_id: Option<String>,
    role_id: String,
    allowed: bool,
    propagate: bool,
    created_at: String,
    updated_at: String,
}

impl AceRow {
    fn into_ace(self) -> Result<Ace> {
        Ok(Ace {
            ace_id: self.ace_id,
            path: self.path,
            ace_type: self.ace_type.parse()?,
            user_id: self.user_id,
            group_id: self.group_id,
            role_id: self.role_id,
            allowed: self.allowed,
            propagate: self.propagate,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
