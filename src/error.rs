//! Error taxonomy for the access control engine
//!
//! Storage failures are never retried here; they are translated and handed
//! back to the caller, who decides how they surface (HTTP status, retry, ...).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Crate-wide result type
pub type Result<T, E = RbacError> = std::result::Result<T, E>;

/// Kind of entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Role,
    Privilege,
    Ace,
    User,
    Group,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Role => "role",
            EntityKind::Privilege => "privilege",
            EntityKind::Ace => "ACE",
            EntityKind::User => "user",
            EntityKind::Group => "group",
        };
        f.write_str(name)
    }
}

/// Access control errors
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} '{name}' already exists")]
    Conflict { kind: EntityKind, name: String },

    #[error("privilege {privilege_id} is not a member of role {role_id}")]
    InvalidMembership {
        role_id: String,
        privilege_id: String,
    },

    #[error("role '{0}' is built in and cannot be modified")]
    BuiltinRole(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl RbacError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        RbacError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        RbacError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Map a write failure, turning unique-constraint violations into `Conflict`
    pub(crate) fn from_write(err: sqlx::Error, kind: EntityKind, name: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return RbacError::Conflict {
                    kind,
                    name: name.to_string(),
                };
            }
        }
        RbacError::Storage(err)
    }

    /// Whether this error means the target entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RbacError::NotFound { .. })
    }
}
