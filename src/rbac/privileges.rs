//! Privilege CRUD

use std::sync::LazyLock;

use regex::Regex;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

use super::roles::fetch_role_privileges;
use super::{new_id, now, Privilege, PrivilegeRow, PrivilegeUpdate, RbacRepository};
use crate::error::{EntityKind, RbacError, Result};

/// `Resource.Action`, e.g. `Node.PowerMgmt` or `ACE.Audit`
static PRIVILEGE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*(\.[A-Z][A-Za-z0-9]*)+$").unwrap());

/// Validate a privilege name for the catalog.
///
/// # Examples
/// ```
/// use rbacd::rbac::validate_privilege_name;
///
/// assert!(validate_privilege_name("Node.PowerMgmt").is_ok());
/// assert!(validate_privilege_name("node.start").is_err());
/// ```
pub fn validate_privilege_name(name: &str) -> Result<()> {
    if PRIVILEGE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(RbacError::invalid(
            "name",
            format!("privilege '{}' must look like 'Resource.Action'", name),
        ))
    }
}

async fn fetch_privilege(
    conn: &mut SqliteConnection,
    privilege_id: &str,
) -> Result<Option<Privilege>> {
    let row: Option<PrivilegeRow> = sqlx::query_as(
        "SELECT privilege_id, name, description, created_at, updated_at FROM privileges WHERE privilege_id = ?",
    )
    .bind(privilege_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(PrivilegeRow::into_privilege))
}

async fn privilege_name_taken(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT privilege_id FROM privileges WHERE name = ?")
            .bind(name)
            .fetch_optional(conn)
            .await?;
    Ok(existing.is_some())
}

impl RbacRepository {
    /// Get a privilege by its ID
    pub async fn get_privilege(&self, privilege_id: &str) -> Result<Option<Privilege>> {
        self.bounded(async {
            let mut conn = self.pool.acquire().await?;
            fetch_privilege(&mut conn, privilege_id).await
        })
        .await
    }

    /// Get a privilege by its name
    pub async fn get_privilege_by_name(&self, name: &str) -> Result<Option<Privilege>> {
        self.bounded(async {
            let row: Option<PrivilegeRow> = sqlx::query_as(
                "SELECT privilege_id, name, description, created_at, updated_at FROM privileges WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(PrivilegeRow::into_privilege))
        })
        .await
    }

    /// Get all privileges, ordered by name
    pub async fn list_privileges(&self) -> Result<Vec<Privilege>> {
        self.bounded(async {
            let rows: Vec<PrivilegeRow> = sqlx::query_as(
                "SELECT privilege_id, name, description, created_at, updated_at FROM privileges ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(PrivilegeRow::into_privilege).collect())
        })
        .await
    }

    /// Get the privileges attached to a role (empty for an unknown role)
    pub async fn list_role_privileges(&self, role_id: &str) -> Result<Vec<Privilege>> {
        self.bounded(async {
            let mut conn = self.pool.acquire().await?;
            fetch_role_privileges(&mut conn, role_id).await
        })
        .await
    }

    /// Create a new privilege
    pub async fn create_privilege(&self, name: &str, description: Option<&str>) -> Result<Privilege> {
        validate_privilege_name(name)?;

        self.bounded(async {
            let mut tx = self.begin_write().await?;
            if privilege_name_taken(&mut tx, name).await? {
                return Err(RbacError::Conflict {
                    kind: EntityKind::Privilege,
                    name: name.to_string(),
                });
            }

            let privilege_id = new_id();
            let now = now();
            sqlx::query(
                "INSERT INTO privileges (privilege_id, name, description, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&privilege_id)
            .bind(name)
            .bind(description)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RbacError::from_write(e, EntityKind::Privilege, name))?;
            tx.commit().await?;

            info!("Created privilege '{}' ({})", name, privilege_id);
            Ok(Privilege {
                privilege_id,
                name: name.to_string(),
                description: description.map(str::to_string),
                created_at: now.clone(),
                updated_at: now,
            })
        })
        .await
    }

    /// Update the fields set in `update`; `None` if the privilege does not exist
    pub async fn update_privilege(
        &self,
        privilege_id: &str,
        update: &PrivilegeUpdate,
    ) -> Result<Option<Privilege>> {
        if let Some(ref name) = update.name {
            validate_privilege_name(name)?;
        }

        let updated = self
            .bounded(async {
                let mut tx = self.begin_write().await?;
                let Some(current) = fetch_privilege(&mut tx, privilege_id).await? else {
                    return Ok(false);
                };
                if let Some(ref name) = update.name {
                    if name != &current.name && privilege_name_taken(&mut tx, name).await? {
                        return Err(RbacError::Conflict {
                            kind: EntityKind::Privilege,
                            name: name.clone(),
                        });
                    }
                }

                let mut query: QueryBuilder<Sqlite> =
                    QueryBuilder::new("UPDATE privileges SET updated_at = ");
                query.push_bind(now());
                if let Some(ref name) = update.name {
                    query.push(", name = ").push_bind(name);
                }
                if let Some(ref description) = update.description {
                    query.push(", description = ").push_bind(description);
                }
                query.push(" WHERE privilege_id = ").push_bind(privilege_id);
                query.build().execute(&mut *tx).await.map_err(|e| {
                    RbacError::from_write(e, EntityKind::Privilege, update.name.as_deref().unwrap_or(""))
                })?;
                tx.commit().await?;
                Ok(true)
            })
            .await?;
        if !updated {
            return Ok(None);
        }

        let mut conn = self.pool.acquire().await?;
        fetch_privilege(&mut conn, privilege_id).await
    }

    /// Delete a privilege, detaching it from every role.
    ///
    /// Returns whether a row was removed.
    pub async fn delete_privilege(&self, privilege_id: &str) -> Result<bool> {
        self.bounded(async {
            let result = sqlx::query("DELETE FROM privileges WHERE privilege_id = ?")
                .bind(privilege_id)
                .execute(&self.pool)
                .await?;
            debug!(
                "Deleted privilege {} ({} row(s))",
                privilege_id,
                result.rows_affected()
            );
            Ok(result.rows_affected() > 0)
        })
        .await
    }
}
