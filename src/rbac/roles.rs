//! Role CRUD

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

use super::{new_id, now, Privilege, PrivilegeRow, RbacRepository, Role, RoleRow, RoleUpdate};
use crate::error::{EntityKind, RbacError, Result};

/// Fetch a role row by id on an open connection
async fn fetch_role_row(
    conn: &mut SqliteConnection,
    role_id: &str,
) -> Result<Option<RoleRow>> {
    let row: Option<RoleRow> = sqlx::query_as(
        "SELECT role_id, name, description, is_builtin, created_at, updated_at FROM roles WHERE role_id = ?",
    )
    .bind(role_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Privileges attached to a role, ordered by name
pub(super) async fn fetch_role_privileges(
    conn: &mut SqliteConnection,
    role_id: &str,
) -> Result<Vec<Privilege>> {
    let rows: Vec<PrivilegeRow> = sqlx::query_as(
        r#"
        SELECT p.privilege_id, p.name, p.description, p.created_at, p.updated_at
        FROM privileges p
        JOIN role_privileges rp ON rp.privilege_id = p.privilege_id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(PrivilegeRow::into_privilege).collect())
}

/// Load a complete role (row plus privileges) on an open connection
pub(super) async fn load_role(conn: &mut SqliteConnection, role_id: &str) -> Result<Option<Role>> {
    let Some(row) = fetch_role_row(&mut *conn, role_id).await? else {
        return Ok(None);
    };
    let privileges = fetch_role_privileges(&mut *conn, &row.role_id).await?;
    Ok(Some(row.into_role(privileges)))
}

async fn role_name_taken(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT role_id FROM roles WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await?;
    Ok(existing.is_some())
}

fn validate_role_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RbacError::invalid("name", "role name cannot be empty"));
    }
    Ok(())
}

/// Row type for the role ↔ privilege join used by list_roles
#[derive(sqlx::FromRow)]
struct RolePrivilegeRow {
    role_id: String,
    #[sqlx(flatten)]
    privilege: PrivilegeRow,
}

impl RbacRepository {
    /// Get a role by its ID, with privileges
    pub async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let role = load_role(&mut tx, role_id).await?;
            tx.commit().await?;
            Ok(role)
        })
        .await
    }

    /// Get a role by its name, with privileges
    pub async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let row: Option<RoleRow> = sqlx::query_as(
                "SELECT role_id, name, description, is_builtin, created_at, updated_at FROM roles WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

            let role = match row {
                Some(row) => {
                    let privileges = fetch_role_privileges(&mut tx, &row.role_id).await?;
                    Some(row.into_role(privileges))
                }
                None => None,
            };
            tx.commit().await?;
            Ok(role)
        })
        .await
    }

    /// Get all roles, with privileges, ordered by name
    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            let rows: Vec<RoleRow> = sqlx::query_as(
                "SELECT role_id, name, description, is_builtin, created_at, updated_at FROM roles ORDER BY name",
            )
            .fetch_all(&mut *tx)
            .await?;

            let links: Vec<RolePrivilegeRow> = sqlx::query_as(
                r#"
                SELECT rp.role_id, p.privilege_id, p.name, p.description, p.created_at, p.updated_at
                FROM role_privileges rp
                JOIN privileges p ON p.privilege_id = rp.privilege_id
                ORDER BY p.name
                "#,
            )
            .fetch_all(&mut *tx)
            .await?;
            tx.commit().await?;

            let mut by_role: HashMap<String, Vec<Privilege>> = HashMap::new();
            for link in links {
                by_role
                    .entry(link.role_id)
                    .or_default()
                    .push(link.privilege.into_privilege());
            }

            Ok(rows
                .into_iter()
                .map(|row| {
                    let privileges = by_role.remove(&row.role_id).unwrap_or_default();
                    row.into_role(privileges)
                })
                .collect())
        })
        .await
    }

    /// Create a new role with no privileges
    pub async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
        validate_role_name(name)?;

        self.bounded(async {
            let mut tx = self.begin_write().await?;
            if role_name_taken(&mut tx, name).await? {
                return Err(RbacError::Conflict {
                    kind: EntityKind::Role,
                    name: name.to_string(),
                });
            }

            let role_id = new_id();
            let now = now();
            sqlx::query(
                "INSERT INTO roles (role_id, name, description, is_builtin, created_at, updated_at)
                 VALUES (?, ?, ?, 0, ?, ?)",
            )
            .bind(&role_id)
            .bind(name)
            .bind(description)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RbacError::from_write(e, EntityKind::Role, name))?;
            tx.commit().await?;

            info!("Created role '{}' ({})", name, role_id);
            Ok(Role {
                role_id,
                name: name.to_string(),
                description: description.map(str::to_string),
                is_builtin: false,
                created_at: now.clone(),
                updated_at: now,
                privileges: Vec::new(),
            })
        })
        .await
    }

    /// Update the fields set in `update`.
    ///
    /// Returns `None` if the role does not exist; otherwise the role as
    /// re-read after commit, with a fresh `updated_at`. The re-read runs
    /// outside the operation timeout.
    pub async fn update_role(&self, role_id: &str, update: &RoleUpdate) -> Result<Option<Role>> {
        if let Some(ref name) = update.name {
            validate_role_name(name)?;
        }

        let updated = self
            .bounded(async {
                let mut tx = self.begin_write().await?;
                let Some(current) = fetch_role_row(&mut tx, role_id).await? else {
                    return Ok(false);
                };
                if current.is_builtin {
                    return Err(RbacError::BuiltinRole(current.name));
                }
                if let Some(ref name) = update.name {
                    if name != &current.name && role_name_taken(&mut tx, name).await? {
                        return Err(RbacError::Conflict {
                            kind: EntityKind::Role,
                            name: name.clone(),
                        });
                    }
                }

                let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE roles SET updated_at = ");
                query.push_bind(now());
                if let Some(ref name) = update.name {
                    query.push(", name = ").push_bind(name);
                }
                if let Some(ref description) = update.description {
                    query.push(", description = ").push_bind(description);
                }
                query.push(" WHERE role_id = ").push_bind(role_id);
                query
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        RbacError::from_write(e, EntityKind::Role, update.name.as_deref().unwrap_or(""))
                    })?;
                tx.commit().await?;
                Ok(true)
            })
            .await?;
        if !updated {
            return Ok(None);
        }

        debug!("Updated role {}", role_id);
        let mut conn = self.pool.acquire().await?;
        load_role(&mut conn, role_id).await
    }

    /// Delete a role; its ACEs and privilege links cascade.
    ///
    /// Returns whether a row was removed. Deleting an unknown role is a no-op.
    pub async fn delete_role(&self, role_id: &str) -> Result<bool> {
        self.bounded(async {
            let mut tx = self.begin_write().await?;
            let Some(current) = fetch_role_row(&mut tx, role_id).await? else {
                return Ok(false);
            };
            if current.is_builtin {
                return Err(RbacError::BuiltinRole(current.name));
            }

            let (aces,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM aces WHERE role_id = ?")
                .bind(role_id)
                .fetch_one(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM roles WHERE role_id = ?")
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!(
                "Deleted role '{}' ({} ACE(s) cascaded)",
                current.name, aces
            );
            Ok(result.rows_affected() > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;
    use std::time::Duration;

    async fn repo() -> RbacRepository {
        RbacRepository::new(test_pool().await)
    }

    #[tokio::test]
    async fn test_create_and_get_role() {
        let repo = repo().await;

        let role = repo
            .create_role("Lab operator", Some("Runs lab nodes"))
            .await
            .unwrap();
        assert!(role.privileges.is_empty());
        assert!(!role.is_builtin);
        assert_eq!(role.created_at, role.updated_at);

        let fetched = repo.get_role(&role.role_id).await.unwrap().unwrap();
        assert_eq!(fetched, role);

        let by_name = repo.get_role_by_name("Lab operator").await.unwrap().unwrap();
        assert_eq!(by_name.role_id, role.role_id);

        assert!(repo.get_role("missing").await.unwrap().is_none());
        assert!(repo.get_role_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_role_duplicate_name() {
        let repo = repo().await;

        repo.create_role("Operator", None).await.unwrap();
        let result = repo.create_role("Operator", None).await;
        assert!(matches!(
            result,
            Err(RbacError::Conflict {
                kind: EntityKind::Role,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_create_role_empty_name() {
        let repo = repo().await;
        assert!(matches!(
            repo.create_role("  ", None).await,
            Err(RbacError::Invalid { field: "name", .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_name() {
        let repo = repo().await;
        let role = repo.create_role("Operator", Some("old")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let update = RoleUpdate {
            description: Some("new".to_string()),
            ..Default::default()
        };
        let updated = repo
            .update_role(&role.role_id, &update)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "Operator");
        assert_eq!(updated.description.as_deref(), Some("new"));
        assert_eq!(updated.created_at, role.created_at);
        assert!(updated.updated_at > role.updated_at);
    }

    #[tokio::test]
    async fn test_update_role_rename_conflict() {
        let repo = repo().await;
        repo.create_role("Alpha", None).await.unwrap();
        let beta = repo.create_role("Beta", None).await.unwrap();

        let update = RoleUpdate {
            name: Some("Alpha".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            repo.update_role(&beta.role_id, &update).await,
            Err(RbacError::Conflict { .. })
        ));

        // Renaming to its own name is fine
        let update = RoleUpdate {
            name: Some("Beta".to_string()),
            ..Default::default()
        };
        assert!(repo.update_role(&beta.role_id, &update).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_role() {
        let repo = repo().await;
        let result = repo
            .update_role("missing", &RoleUpdate::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_role_is_idempotent() {
        let repo = repo().await;
        let role = repo.create_role("Temporary", None).await.unwrap();

        assert!(repo.delete_role(&role.role_id).await.unwrap());
        assert!(!repo.delete_role(&role.role_id).await.unwrap());
        assert!(!repo.delete_role("never-existed").await.unwrap());
        assert!(repo.get_role(&role.role_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_roles_loads_privileges() {
        let repo = repo().await;
        let viewer = repo.create_role("Viewer", None).await.unwrap();
        repo.create_role("Empty", None).await.unwrap();
        let audit = repo.create_privilege("Project.Audit", None).await.unwrap();
        repo.add_privilege_to_role(&viewer.role_id, &audit.privilege_id)
            .await
            .unwrap();

        let roles = repo.list_roles().await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Empty", "Viewer"]);
        assert!(roles[0].privileges.is_empty());
        assert!(roles[1].has_privilege("Project.Audit"));
    }
}
