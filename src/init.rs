//! Database initialization module
//!
//! Provides one-time database setup for the rbacd_init tool.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::db::Database;
use crate::rbac::path::ROOT;
use crate::rbac::{AceCreate, RbacRepository};
use crate::subjects::SubjectStore;

/// Name of the role given to the initial administrator
pub const ADMIN_ROLE: &str = "Administrator";

/// Initialize a new access control database
///
/// # Arguments
/// * `path` - Path to the SQLite database file (must not exist)
/// * `admin_username` - When set, a user granted `Administrator` on `/`
///
/// # Errors
/// * Database file already exists
/// * Database creation fails
pub async fn init_database(path: &Path, admin_username: Option<&str>) -> Result<()> {
    // Fail if database already exists
    if path.exists() {
        bail!(
            "Database file already exists: {}. Remove it first or use a different path.",
            path.display()
        );
    }

    let path_str = path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;

    info!("Creating new database at {}", path.display());

    // Create the database (runs migrations)
    let db = Database::new(Some(path_str)).await?;
    let repo = RbacRepository::new(db.pool().clone());
    repo.seed_builtin_catalog().await?;

    if let Some(username) = admin_username {
        let subjects = SubjectStore::new(db.pool().clone());
        let user = subjects.create_user(username).await?;
        let role = repo
            .get_role_by_name(ADMIN_ROLE)
            .await?
            .with_context(|| format!("Built-in role '{}' is missing", ADMIN_ROLE))?;

        repo.create_ace(
            &AceCreate::for_user(ROOT, &user.user_id, &role.role_id)
                .with_allowed(true)
                .with_propagate(true),
        )
        .await?;
        info!("Granted '{}' {} on {}", username, ADMIN_ROLE, ROOT);
    }

    info!("Database initialization complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::catalog::BUILTIN_PRIVILEGES;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_database_creates_new() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("rbac.db");

        init_database(&db_path, Some("admin")).await.unwrap();
        assert!(db_path.exists());

        let db = Database::new(db_path.to_str()).await.unwrap();
        let repo = RbacRepository::new(db.pool().clone());
        let subjects = SubjectStore::new(db.pool().clone());
        let admin = subjects.get_user_by_username("admin").await.unwrap().unwrap();

        // Administrator on "/" reaches everything
        for (privilege, _) in BUILTIN_PRIVILEGES {
            assert!(repo
                .check_privilege(&admin.user_id, "/projects/p1/nodes/n1", privilege)
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_init_database_without_admin() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("rbac.db");

        init_database(&db_path, None).await.unwrap();

        let db = Database::new(db_path.to_str()).await.unwrap();
        let repo = RbacRepository::new(db.pool().clone());
        assert!(repo.list_aces().await.unwrap().is_empty());
        assert!(!repo.list_roles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_database_fails_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("rbac.db");

        init_database(&db_path, None).await.unwrap();

        let result = init_database(&db_path, None).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }
}
