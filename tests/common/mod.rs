//! Common test utilities - RbacTest fixture for end-to-end checks

use std::sync::Arc;

use rbacd::db::Database;
use rbacd::rbac::{Ace, AceCreate, RbacRepository, Role};
use rbacd::AccessControl;

/// In-memory engine with one user and one role holding one privilege
pub struct RbacTest {
    pub engine: AccessControl,
    pub user_id: String,
    pub role: Role,
    pub privilege: String,
}

impl RbacTest {
    /// Privilege granted by the fixture role
    pub const PRIVILEGE: &'static str = "Node.PowerMgmt";

    pub async fn start() -> Self {
        let db = Database::new(None)
            .await
            .expect("Failed to create test database");
        let engine = AccessControl::with_database(Arc::new(db), None);

        let user = engine
            .subjects()
            .create_user("alice")
            .await
            .expect("Failed to create user");
        let role = Self::role_with(&engine, "Operator", &[Self::PRIVILEGE]).await;

        Self {
            engine,
            user_id: user.user_id,
            role,
            privilege: Self::PRIVILEGE.to_string(),
        }
    }

    /// Create a role holding the given privileges, creating missing ones
    pub async fn role_with(engine: &AccessControl, name: &str, privileges: &[&str]) -> Role {
        let rbac = engine.rbac();
        let role = rbac.create_role(name, None).await.expect("Failed to create role");
        for name in privileges {
            let privilege = match rbac.get_privilege_by_name(name).await.unwrap() {
                Some(p) => p,
                None => rbac.create_privilege(name, None).await.unwrap(),
            };
            rbac.add_privilege_to_role(&role.role_id, &privilege.privilege_id)
                .await
                .expect("Failed to add privilege");
        }
        rbac.get_role(&role.role_id).await.unwrap().unwrap()
    }

    pub fn rbac(&self) -> &RbacRepository {
        self.engine.rbac()
    }

    /// Add a rule for the fixture user through the fixture role
    pub async fn rule(&self, path: &str, allowed: bool, propagate: bool) -> Ace {
        self.rule_via(&self.role, path, allowed, propagate).await
    }

    /// Add a rule for the fixture user through another role
    pub async fn rule_via(&self, role: &Role, path: &str, allowed: bool, propagate: bool) -> Ace {
        self.rbac()
            .create_ace(
                &AceCreate::for_user(path, &self.user_id, &role.role_id)
                    .with_allowed(allowed)
                    .with_propagate(propagate),
            )
            .await
            .expect("Failed to create ACE")
    }

    /// Check the fixture privilege for the fixture user
    pub async fn check(&self, path: &str) -> bool {
        self.rbac()
            .check_privilege(&self.user_id, path, &self.privilege)
            .await
            .expect("Privilege check failed")
    }
}
