//! Hierarchical permission resolution
//!
//! Resolution order for `(user, path, privilege)`:
//! 1. Load the candidate set: the user's ACEs whose role holds the privilege
//! 2. Walk the path's ancestors, most specific first (see [`ancestors`])
//! 3. At each level, a deny → Denied, even if an allow sits at the same level
//! 4. An allow at the queried path itself, or a propagating allow above it → Allowed
//! 5. Default: Denied
//!
//! A deny is decisive at whatever level it sits, propagating or not. Group
//! ACEs are not part of the candidate set.

use serde::Serialize;
use tracing::debug;

use super::path::ancestors;
use super::RbacRepository;
use crate::error::Result;

/// One candidate rule as loaded for a privilege check
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CandidateAce {
    pub path: String,
    pub allowed: bool,
    pub propagate: bool,
}

impl CandidateAce {
    pub fn allow(path: &str, propagate: bool) -> Self {
        Self {
            path: path.to_string(),
            allowed: true,
            propagate,
        }
    }

    pub fn deny(path: &str, propagate: bool) -> Self {
        Self {
            path: path.to_string(),
            allowed: false,
            propagate,
        }
    }
}

/// Outcome of a privilege check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Granted by an allow at `at`
    Allowed { at: String },
    /// Refused by an explicit deny at `at`
    Denied { at: String },
    /// No rule decided the outcome
    NoMatchingRule,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Resolve a decision for `resource_path` from an already-loaded candidate set.
pub fn resolve(candidates: &[CandidateAce], resource_path: &str) -> Decision {
    for level in ancestors(resource_path) {
        let mut granted = false;
        for ace in candidates.iter().filter(|ace| ace.path == level) {
            if !ace.allowed {
                return Decision::Denied {
                    at: level.to_string(),
                };
            }
            // A non-propagating allow only grants exactly at its own path
            if level == resource_path || ace.propagate {
                granted = true;
            }
        }
        if granted {
            return Decision::Allowed {
                at: level.to_string(),
            };
        }
    }
    Decision::NoMatchingRule
}

impl RbacRepository {
    /// Load the candidate ACE set for a user and privilege in one query
    pub async fn candidate_aces(
        &self,
        user_id: &str,
        privilege_name: &str,
    ) -> Result<Vec<CandidateAce>> {
        self.bounded(async {
            let rows: Vec<CandidateAce> = sqlx::query_as(
                r#"
                SELECT a.path, a.allowed, a.propagate
                FROM aces a
                JOIN role_privileges rp ON rp.role_id = a.role_id
                JOIN privileges p ON p.privilege_id = rp.privilege_id
                WHERE a.ace_type = 'user' AND a.user_id = ? AND p.name = ?
                ORDER BY a.path DESC
                "#,
            )
            .bind(user_id)
            .bind(privilege_name)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    /// Check a privilege and report which rule decided it
    pub async fn explain_privilege(
        &self,
        user_id: &str,
        resource_path: &str,
        privilege_name: &str,
    ) -> Result<Decision> {
        let candidates = self.candidate_aces(user_id, privilege_name).await?;
        let decision = resolve(&candidates, resource_path);
        debug!(
            user_id,
            resource_path,
            privilege = privilege_name,
            candidates = candidates.len(),
            ?decision,
            "Privilege check"
        );
        Ok(decision)
    }

    /// Check whether a user holds a privilege on a resource path.
    ///
    /// Absence of any matching rule is a deny, not an error; only storage
    /// failures are returned as `Err`.
    pub async fn check_privilege(
        &self,
        user_id: &str,
        resource_path: &str,
        privilege_name: &str,
    ) -> Result<bool> {
        Ok(self
            .explain_privilege(user_id, resource_path, privilege_name)
            .await?
            .is_allowed())
    }
}
