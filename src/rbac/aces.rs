//! ACE CRUD and path-scope maintenance

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

use super::path::{subtree_bounds, validate_resource_path};
use super::{new_id, now, Ace, AceCreate, AceRow, AceType, AceUpdate, RbacRepository};
use crate::error::{EntityKind, RbacError, Result};

async fn fetch_ace(conn: &mut SqliteConnection, ace_id: &str) -> Result<Option<Ace>> {
    let row: Option<AceRow> = sqlx::query_as(
        r#"
        SELECT ace_id, path, ace_type, user_id, group_id, role_id, allowed, propagate, created_at, updated_at
        FROM aces WHERE ace_id = ?
        "#,
    )
    .bind(ace_id)
    .fetch_optional(conn)
    .await?;
    row.map(AceRow::into_ace).transpose()
}

pub(super) async fn require_role(conn: &mut SqliteConnection, role_id: &str) -> Result<()> {
    let exists: Option<(String,)> = sqlx::query_as("SELECT role_id FROM roles WHERE role_id = ?")
        .bind(role_id)
        .fetch_optional(conn)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(RbacError::not_found(EntityKind::Role, role_id)),
    }
}

/// Check that exactly the subject matching `ace_type` is set, and that it exists
async fn require_subject(conn: &mut SqliteConnection, ace: &AceCreate) -> Result<()> {
    let (kind, id, query) = match (ace.ace_type, &ace.user_id, &ace.group_id) {
        (AceType::User, Some(user_id), None) => (
            EntityKind::User,
            user_id,
            "SELECT user_id FROM users WHERE user_id = ?",
        ),
        (AceType::Group, None, Some(group_id)) => (
            EntityKind::Group,
            group_id,
            "SELECT user_group_id FROM user_groups WHERE user_group_id = ?",
        ),
        (ace_type, _, _) => {
            return Err(RbacError::invalid(
                "subject",
                format!(
                    "a {} ACE needs exactly one subject, its {}_id",
                    ace_type.as_str(),
                    ace_type.as_str()
                ),
            ))
        }
    };

    let exists: Option<(String,)> = sqlx::query_as(query)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(RbacError::not_found(kind, id.as_str())),
    }
}

impl RbacRepository {
    /// Get an ACE by its ID
    pub async fn get_ace(&self, ace_id: &str) -> Result<Option<Ace>> {
        self.bounded(async {
            let mut conn = self.pool.acquire().await?;
            fetch_ace(&mut conn, ace_id).await
        })
        .await
    }

    /// Get the oldest ACE at exactly `path`
    pub async fn get_ace_by_path(&self, path: &str) -> Result<Option<Ace>> {
        self.bounded(async {
            let row: Option<AceRow> = sqlx::query_as(
                r#"
                SELECT ace_id, path, ace_type, user_id, group_id, role_id, allowed, propagate, created_at, updated_at
                FROM aces WHERE path = ?
                ORDER BY created_at, ace_id
                LIMIT 1
                "#,
            )
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            row.map(AceRow::into_ace).transpose()
        })
        .await
    }

    /// Get all ACEs, ordered by path
    pub async fn list_aces(&self) -> Result<Vec<Ace>> {
        self.bounded(async {
            let rows: Vec<AceRow> = sqlx::query_as(
                r#"
                SELECT ace_id, path, ace_type, user_id, group_id, role_id, allowed, propagate, created_at, updated_at
                FROM aces ORDER BY path, created_at
                "#,
            )
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(AceRow::into_ace).collect()
        })
        .await
    }

    /// Check if any ACE exists at exactly `path`
    pub async fn ace_exists(&self, path: &str) -> Result<bool> {
        self.bounded(async {
            let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM aces WHERE path = ? LIMIT 1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
            Ok(found.is_some())
        })
        .await
    }

    /// Create a new ACE.
    ///
    /// Fails with `NotFound` if the role or subject does not exist and with
    /// `Conflict` if the subject already has a rule for this role at `path`.
    pub async fn create_ace(&self, ace: &AceCreate) -> Result<Ace> {
        validate_resource_path(&ace.path)?;

        self.bounded(async {
            let mut tx = self.begin_write().await?;
            require_role(&mut tx, &ace.role_id).await?;
            require_subject(&mut tx, ace).await?;

            let ace_id = new_id();
            let now = now();
            let allowed = ace.allowed.unwrap_or(true);
            let propagate = ace.propagate.unwrap_or(true);
            sqlx::query(
                r#"
                INSERT INTO aces (ace_id, path, ace_type, user_id, group_id, role_id, allowed, propagate, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&ace_id)
            .bind(&ace.path)
            .bind(ace.ace_type.as_str())
            .bind(&ace.user_id)
            .bind(&ace.group_id)
            .bind(&ace.role_id)
            .bind(allowed)
            .bind(propagate)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RbacError::from_write(e, EntityKind::Ace, &ace.path))?;
            tx.commit().await?;

            info!(
                "Created {} ACE {} on '{}' ({})",
                if allowed { "allowing" } else { "denying" },
                ace_id,
                ace.path,
                if propagate { "propagating" } else { "exact" }
            );
            Ok(Ace {
                ace_id,
                path: ace.path.clone(),
                ace_type: ace.ace_type,
                user_id: ace.user_id.clone(),
                group_id: ace.group_id.clone(),
                role_id: ace.role_id.clone(),
                allowed,
                propagate,
                created_at: now.clone(),
                updated_at: now,
            })
        })
        .await
    }

    /// Update the fields set in `update`; `None` if the ACE does not exist
    pub async fn update_ace(&self, ace_id: &str, update: &AceUpdate) -> Result<Option<Ace>> {
        if let Some(ref path) = update.path {
            validate_resource_path(path)?;
        }

        let updated = self
            .bounded(async {
                let mut tx = self.begin_write().await?;
                let Some(current) = fetch_ace(&mut tx, ace_id).await? else {
                    return Ok(false);
                };
                if let Some(ref role_id) = update.role_id {
                    require_role(&mut tx, role_id).await?;
                }

                let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE aces SET updated_at = ");
                query.push_bind(now());
                if let Some(ref path) = update.path {
                    query.push(", path = ").push_bind(path);
                }
                if let Some(ref role_id) = update.role_id {
                    query.push(", role_id = ").push_bind(role_id);
                }
                if let Some(allowed) = update.allowed {
                    query.push(", allowed = ").push_bind(allowed);
                }
                if let Some(propagate) = update.propagate {
                    query.push(", propagate = ").push_bind(propagate);
                }
                query.push(" WHERE ace_id = ").push_bind(ace_id);

                let path = update.path.as_deref().unwrap_or(&current.path);
                query
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| RbacError::from_write(e, EntityKind::Ace, path))?;
                tx.commit().await?;
                Ok(true)
            })
            .await?;
        if !updated {
            return Ok(None);
        }

        debug!("Updated ACE {}", ace_id);
        let mut conn = self.pool.acquire().await?;
        fetch_ace(&mut conn, ace_id).await
    }

    /// Delete an ACE. Returns whether a row was removed.
    pub async fn delete_ace(&self, ace_id: &str) -> Result<bool> {
        self.bounded(async {
            let result = sqlx::query("DELETE FROM aces WHERE ace_id = ?")
                .bind(ace_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Delete every ACE scoped to `prefix` or anything below it.
    ///
    /// Matching is per path segment: purging `/p1` removes `/p1` and
    /// `/p1/...` but keeps `/p1b`. Returns the number of ACEs removed; zero
    /// matches is not an error.
    pub async fn delete_aces_under_path(&self, prefix: &str) -> Result<u64> {
        let (exact, descendants) = subtree_bounds(prefix);
        let descendants_len = descendants.chars().count() as i64;

        self.bounded(async {
            let result = sqlx::query("DELETE FROM aces WHERE path = ? OR substr(path, 1, ?) = ?")
                .bind(&exact)
                .bind(descendants_len)
                .bind(&descendants)
                .execute(&self.pool)
                .await?;
            debug!("{} ACE(s) have been deleted under '{}'", result.rows_affected(), prefix);
            Ok(result.rows_affected())
        })
        .await
    }
}
