//! Subjects that ACEs can target
//!
//! Identity and credentials are established elsewhere; this store only
//! keeps the user and group rows that ACEs reference, so deleting a
//! subject cascades its ACEs.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::error::{EntityKind, RbacError, Result};
use crate::rbac::now;

/// A user subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub created_at: String,
}

/// A group subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub user_group_id: String,
    pub name: String,
    pub created_at: String,
}

/// Store for user and group subjects
#[derive(Debug, Clone)]
pub struct SubjectStore {
    pool: SqlitePool,
}

impl SubjectStore {
    /// Create a new subject store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create_user(&self, username: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(RbacError::invalid("username", "username cannot be empty"));
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(RbacError::Conflict {
                kind: EntityKind::User,
                name: username.to_string(),
            });
        }

        let user = User {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at: now(),
        };
        sqlx::query("INSERT INTO users (user_id, username, created_at) VALUES (?, ?, ?)")
            .bind(&user.user_id)
            .bind(&user.username)
            .bind(&user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RbacError::from_write(e, EntityKind::User, username))?;

        info!("Created user '{}' ({})", username, user.user_id);
        Ok(user)
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user: Option<User> =
            sqlx::query_as("SELECT user_id, username, created_at FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    /// Get user by username
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user: Option<User> =
            sqlx::query_as("SELECT user_id, username, created_at FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    /// Get all users, ordered by username
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users: Vec<User> =
            sqlx::query_as("SELECT user_id, username, created_at FROM users ORDER BY username")
                .fetch_all(&self.pool)
                .await?;
        Ok(users)
    }

    /// Delete a user and, by cascade, their ACEs
    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create a new group
    pub async fn create_group(&self, name: &str) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(RbacError::invalid("name", "group name cannot be empty"));
        }

        let group = Group {
            user_group_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now(),
        };
        sqlx::query("INSERT INTO user_groups (user_group_id, name, created_at) VALUES (?, ?, ?)")
            .bind(&group.user_group_id)
            .bind(&group.name)
            .bind(&group.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RbacError::from_write(e, EntityKind::Group, name))?;

        info!("Created group '{}' ({})", name, group.user_group_id);
        Ok(group)
    }

    /// Get group by ID
    pub async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        let group: Option<Group> = sqlx::query_as(
            "SELECT user_group_id, name, created_at FROM user_groups WHERE user_group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(group)
    }

    /// Delete a group and, by cascade, its ACEs
    pub async fn delete_group(&self, group_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_groups WHERE user_group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;
    use crate::rbac::{AceCreate, RbacRepository};

    #[tokio::test]
    async fn test_user_create_and_lookup() {
        let store = SubjectStore::new(test_pool().await);

        let user = store.create_user("alice").await.unwrap();
        assert_eq!(store.get_user(&user.user_id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            store.get_user_by_username("alice").await.unwrap(),
            Some(user.clone())
        );
        assert_eq!(store.list_users().await.unwrap(), vec![user]);
        assert!(store.get_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_create_duplicate() {
        let store = SubjectStore::new(test_pool().await);

        store.create_user("alice").await.unwrap();
        let result = store.create_user("alice").await;
        assert!(matches!(
            result,
            Err(RbacError::Conflict {
                kind: EntityKind::User,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_group_create_duplicate() {
        let store = SubjectStore::new(test_pool().await);

        let group = store.create_group("lab-admins").await.unwrap();
        assert_eq!(
            store.get_group(&group.user_group_id).await.unwrap(),
            Some(group)
        );
        assert!(matches!(
            store.create_group("lab-admins").await,
            Err(RbacError::Conflict {
                kind: EntityKind::Group,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_deleting_subjects_cascades_aces() {
        let pool = test_pool().await;
        let store = SubjectStore::new(pool.clone());
        let repo = RbacRepository::new(pool);

        let user = store.create_user("alice").await.unwrap();
        let group = store.create_group("lab-admins").await.unwrap();
        let role = repo.create_role("Operator", None).await.unwrap();
        repo.create_ace(&AceCreate::for_user("/p1", &user.user_id, &role.role_id))
            .await
            .unwrap();
        repo.create_ace(&AceCreate::for_group("/p1", &group.user_group_id, &role.role_id))
            .await
            .unwrap();
        assert_eq!(repo.list_aces().await.unwrap().len(), 2);

        assert!(store.delete_user(&user.user_id).await.unwrap());
        assert_eq!(repo.list_aces().await.unwrap().len(), 1);

        assert!(store.delete_group(&group.user_group_id).await.unwrap());
        assert!(repo.list_aces().await.unwrap().is_empty());

        assert!(!store.delete_user(&user.user_id).await.unwrap());
    }
}
