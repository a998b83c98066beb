//! Role ↔ privilege association
//!
//! Membership is stored as explicit `role_privileges` rows. Adding is an
//! upsert into a set; removing something that was never attached is a
//! domain error. Built-in roles accept membership changes, so privileges
//! added to the catalog later can still be attached to them.

use sqlx::SqliteConnection;
use tracing::debug;

use super::aces::require_role;
use super::roles::load_role;
use super::{now, RbacRepository, Role};
use crate::error::{EntityKind, RbacError, Result};

async fn touch_role(conn: &mut SqliteConnection, role_id: &str) -> Result<()> {
    sqlx::query("UPDATE roles SET updated_at = ? WHERE role_id = ?")
        .bind(now())
        .bind(role_id)
        .execute(conn)
        .await?;
    Ok(())
}

impl RbacRepository {
    /// Add a privilege to a role. Adding a privilege the role already has
    /// succeeds without change.
    ///
    /// Returns the role as re-read after commit, outside the operation
    /// timeout.
    pub async fn add_privilege_to_role(&self, role_id: &str, privilege_id: &str) -> Result<Role> {
        self.bounded(async {
            let mut tx = self.begin_write().await?;
            require_role(&mut tx, role_id).await?;

            let privilege: Option<(String,)> =
                sqlx::query_as("SELECT privilege_id FROM privileges WHERE privilege_id = ?")
                    .bind(privilege_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if privilege.is_none() {
                return Err(RbacError::not_found(EntityKind::Privilege, privilege_id));
            }

            let result = sqlx::query(
                "INSERT OR IGNORE INTO role_privileges (role_id, privilege_id) VALUES (?, ?)",
            )
            .bind(role_id)
            .bind(privilege_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                touch_role(&mut tx, role_id).await?;
            }
            tx.commit().await?;

            debug!("Added privilege {} to role {}", privilege_id, role_id);
            Ok(())
        })
        .await?;
        self.reload_role(role_id).await
    }

    /// Remove a privilege from a role.
    ///
    /// Fails with `InvalidMembership` if the privilege was not attached.
    pub async fn remove_privilege_from_role(
        &self,
        role_id: &str,
        privilege_id: &str,
    ) -> Result<Role> {
        self.bounded(async {
            let mut tx = self.begin_write().await?;
            require_role(&mut tx, role_id).await?;

            let result =
                sqlx::query("DELETE FROM role_privileges WHERE role_id = ? AND privilege_id = ?")
                    .bind(role_id)
                    .bind(privilege_id)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(RbacError::InvalidMembership {
                    role_id: role_id.to_string(),
                    privilege_id: privilege_id.to_string(),
                });
            }
            touch_role(&mut tx, role_id).await?;
            tx.commit().await?;

            debug!("Removed privilege {} from role {}", privilege_id, role_id);
            Ok(())
        })
        .await?;
        self.reload_role(role_id).await
    }

    /// Re-read a role after a committed membership change
    async fn reload_role(&self, role_id: &str) -> Result<Role> {
        let mut conn = self.pool.acquire().await?;
        load_role(&mut conn, role_id)
            .await?
            .ok_or_else(|| RbacError::not_found(EntityKind::Role, role_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;

    async fn repo() -> RbacRepository {
        RbacRepository::new(test_pool().await)
    }

    #[tokio::test]
    async fn test_add_and_remove_privilege() {
        let repo = repo().await;
        let role = repo.create_role("Operator", None).await.unwrap();
        let start = repo.create_privilege("Node.Start", None).await.unwrap();
        let stop = repo.create_privilege("Node.Stop", None).await.unwrap();

        repo.add_privilege_to_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap();
        let role_now = repo
            .add_privilege_to_role(&role.role_id, &stop.privilege_id)
            .await
            .unwrap();
        assert!(role_now.has_privilege("Node.Start"));
        assert!(role_now.has_privilege("Node.Stop"));

        let role_now = repo
            .remove_privilege_from_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap();
        assert!(!role_now.has_privilege("Node.Start"));
        assert!(role_now.has_privilege("Node.Stop"));
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let repo = repo().await;
        let role = repo.create_role("Operator", None).await.unwrap();
        let start = repo.create_privilege("Node.Start", None).await.unwrap();

        repo.add_privilege_to_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap();
        let role_now = repo
            .add_privilege_to_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap();
        assert_eq!(role_now.privileges.len(), 1);
    }

    #[tokio::test]
    async fn test_add_to_missing_role_or_privilege() {
        let repo = repo().await;
        let role = repo.create_role("Operator", None).await.unwrap();
        let start = repo.create_privilege("Node.Start", None).await.unwrap();

        let err = repo
            .add_privilege_to_role("missing", &start.privilege_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::NotFound {
                kind: EntityKind::Role,
                ..
            }
        ));

        let err = repo
            .add_privilege_to_role(&role.role_id, "missing")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::NotFound {
                kind: EntityKind::Privilege,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_remove_non_member() {
        let repo = repo().await;
        let role = repo.create_role("Operator", None).await.unwrap();
        let start = repo.create_privilege("Node.Start", None).await.unwrap();

        let err = repo
            .remove_privilege_from_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::InvalidMembership { .. }));

        // The failed removal left the role untouched
        let unchanged = repo.get_role(&role.role_id).await.unwrap().unwrap();
        assert_eq!(unchanged.updated_at, role.updated_at);
    }

    #[tokio::test]
    async fn test_builtin_role_takes_new_catalog_privileges() {
        let repo = repo().await;
        repo.seed_builtin_catalog().await.unwrap();
        let admin = repo.get_role_by_name("Administrator").await.unwrap().unwrap();
        let appliance = repo.create_privilege("Appliance.Audit", None).await.unwrap();

        let admin_now = repo
            .add_privilege_to_role(&admin.role_id, &appliance.privilege_id)
            .await
            .unwrap();
        assert!(admin_now.is_builtin);
        assert!(admin_now.has_privilege("Appliance.Audit"));
        assert_eq!(admin_now.privileges.len(), admin.privileges.len() + 1);

        let admin_now = repo
            .remove_privilege_from_role(&admin.role_id, &appliance.privilege_id)
            .await
            .unwrap();
        assert_eq!(admin_now.privileges, admin.privileges);
    }

    #[tokio::test]
    async fn test_membership_change_under_timeout_returns_fresh_role() {
        let repo = repo().await.with_timeout(Some(std::time::Duration::from_secs(5)));
        let role = repo.create_role("Operator", None).await.unwrap();
        let start = repo.create_privilege("Node.Start", None).await.unwrap();

        let role_now = repo
            .add_privilege_to_role(&role.role_id, &start.privilege_id)
            .await
            .unwrap();
        assert!(role_now.has_privilege("Node.Start"));
        assert!(role_now.updated_at >= role.updated_at);
    }
}
