//! Database module - SQLite schema for subjects, roles, privileges and ACEs

#[cfg(test)]
pub mod test_utils;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;

/// Database handle wrapping SQLite connection pool
#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    /// If path is None, uses in-memory database (for testing)
    pub async fn new(path: Option<&str>) -> Result<Self> {
        Self::connect(path, 10).await
    }

    /// Open the database described by the configuration
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(config.path.as_deref(), config.max_connections).await
    }

    async fn connect(path: Option<&str>, max_connections: u32) -> Result<Self> {
        let conn_str = match path {
            Some(p) => format!("sqlite:{}?mode=rwc", p),
            None => "sqlite::memory:".to_string(),
        };

        let options = SqliteConnectOptions::from_str(&conn_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        // Subjects
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_groups (
                user_group_id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Roles and privileges
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS roles (
                role_id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                is_builtin INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS privileges (
                privilege_id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_privileges (
                role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                privilege_id TEXT NOT NULL REFERENCES privileges(privilege_id) ON DELETE CASCADE,
                PRIMARY KEY (role_id, privilege_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Access control entries
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aces (
                ace_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                ace_type TEXT NOT NULL CHECK (ace_type IN ('user', 'group')),
                user_id TEXT REFERENCES users(user_id) ON DELETE CASCADE,
                group_id TEXT REFERENCES user_groups(user_group_id) ON DELETE CASCADE,
                role_id TEXT NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
                allowed INTEGER NOT NULL DEFAULT 1,
                propagate INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (
                    (ace_type = 'user' AND user_id IS NOT NULL AND group_id IS NULL)
                    OR (ace_type = 'group' AND group_id IS NOT NULL AND user_id IS NULL)
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_aces_path ON aces(path)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_aces_user ON aces(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_aces_user_rule ON aces(path, user_id, role_id) WHERE user_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_aces_group_rule ON aces(path, group_id, role_id) WHERE group_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_role_privileges_privilege ON role_privileges(privilege_id)",
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
