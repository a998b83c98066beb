//! rbacd - access control engine for a network emulation server
//!
//! Decides whether a subject holds a named privilege on a hierarchical
//! resource path, from roles, privileges and path-scoped allow/deny rules.

pub mod config;
pub mod db;
pub mod error;
pub mod init;
pub mod rbac;
pub mod subjects;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use config::Config;
pub use error::{EntityKind, RbacError};

use db::Database;
use rbac::RbacRepository;
use subjects::SubjectStore;

/// Engine instance: one database and the stores built on it
#[derive(Debug, Clone)]
pub struct AccessControl {
    db: Arc<Database>,
    rbac: RbacRepository,
    subjects: SubjectStore,
}

impl AccessControl {
    /// Open the configured database and build the stores
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Database::from_config(&config.database).await?;
        info!(
            "Opened access control database ({})",
            config.database.path.as_deref().unwrap_or("in-memory")
        );
        Ok(Self::with_database(
            Arc::new(db),
            config.database.operation_timeout(),
        ))
    }

    /// Build the stores over an existing database
    pub fn with_database(db: Arc<Database>, timeout: Option<std::time::Duration>) -> Self {
        let rbac = RbacRepository::new(db.pool().clone()).with_timeout(timeout);
        let subjects = SubjectStore::new(db.pool().clone());
        Self { db, rbac, subjects }
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Roles, privileges, ACEs and privilege checks
    pub fn rbac(&self) -> &RbacRepository {
        &self.rbac
    }

    /// Users and groups
    pub fn subjects(&self) -> &SubjectStore {
        &self.subjects
    }

    /// Purge the ACEs of a deleted resource subtree
    pub async fn resource_deleted(&self, path: &str) -> error::Result<u64> {
        self.rbac.delete_aces_under_path(path).await
    }
}
