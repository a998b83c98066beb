//! Built-in privilege catalog and default roles
//!
//! Seeding is idempotent: existing rows (matched by name) are kept as they
//! are, missing ones are inserted, and built-in role memberships are
//! topped up.

use tracing::info;

use super::{new_id, now, RbacRepository};
use crate::error::Result;

/// Privileges shipped with every installation: (name, description)
pub const BUILTIN_PRIVILEGES: &[(&str, &str)] = &[
    ("Project.Audit", "View projects and their settings"),
    ("Project.Allocate", "Create, duplicate and import projects"),
    ("Project.Modify", "Change, open, close and delete projects"),
    ("Snapshot.Audit", "View project snapshots"),
    ("Snapshot.Allocate", "Create and restore project snapshots"),
    ("Node.Audit", "View nodes"),
    ("Node.Allocate", "Add and delete nodes"),
    ("Node.Modify", "Change node settings"),
    ("Node.PowerMgmt", "Start, stop, suspend and reload nodes"),
    ("Node.Console", "Open node consoles"),
    ("Link.Audit", "View links"),
    ("Link.Allocate", "Add and delete links"),
    ("Link.Modify", "Change links and their filters"),
    ("Link.Capture", "Capture packets on links"),
    ("Drawing.Audit", "View drawings"),
    ("Drawing.Allocate", "Add and delete drawings"),
    ("Drawing.Modify", "Change drawings"),
    ("Template.Audit", "View templates"),
    ("Template.Allocate", "Create and delete templates"),
    ("Template.Modify", "Change templates"),
    ("Image.Audit", "View images"),
    ("Image.Allocate", "Upload and delete images"),
    ("Compute.Audit", "View computes"),
    ("Compute.Allocate", "Register and remove computes"),
    ("Compute.Modify", "Change compute settings"),
    ("User.Audit", "View users"),
    ("User.Allocate", "Create and delete users"),
    ("User.Modify", "Change users"),
    ("Group.Audit", "View user groups"),
    ("Group.Allocate", "Create and delete user groups"),
    ("Group.Modify", "Change user groups and their members"),
    ("Role.Audit", "View roles"),
    ("Role.Allocate", "Create and delete roles"),
    ("Role.Modify", "Change roles and their privileges"),
    ("Privilege.Audit", "View privileges"),
    ("ACE.Audit", "View access control entries"),
    ("ACE.Allocate", "Create and delete access control entries"),
    ("ACE.Modify", "Change access control entries"),
    ("Symbol.Audit", "View symbols"),
    ("Symbol.Allocate", "Upload symbols"),
];

/// Which catalog privileges a built-in role receives
#[derive(Debug, Clone, Copy)]
pub enum Grants {
    All,
    /// Every privilege whose name ends with the suffix, e.g. `.Audit`
    Suffix(&'static str),
    Only(&'static [&'static str]),
    Nothing,
}

impl Grants {
    pub fn includes(&self, privilege: &str) -> bool {
        match self {
            Grants::All => true,
            Grants::Suffix(suffix) => privilege.ends_with(suffix),
            Grants::Only(names) => names.contains(&privilege),
            Grants::Nothing => false,
        }
    }
}

/// A built-in role definition
#[derive(Debug, Clone, Copy)]
pub struct BuiltinRole {
    pub name: &'static str,
    pub description: &'static str,
    pub grants: Grants,
}

pub const BUILTIN_ROLES: &[BuiltinRole] = &[
    BuiltinRole {
        name: "Administrator",
        description: "Administrator role",
        grants: Grants::All,
    },
    BuiltinRole {
        name: "User",
        description: "User role",
        grants: Grants::Only(&[
            "Project.Audit",
            "Project.Allocate",
            "Project.Modify",
            "Snapshot.Audit",
            "Snapshot.Allocate",
            "Node.Audit",
            "Node.Allocate",
            "Node.Modify",
            "Node.PowerMgmt",
            "Node.Console",
            "Link.Audit",
            "Link.Allocate",
            "Link.Modify",
            "Link.Capture",
            "Drawing.Audit",
            "Drawing.Allocate",
            "Drawing.Modify",
            "Template.Audit",
            "Image.Audit",
            "Compute.Audit",
            "Symbol.Audit",
            "Symbol.Allocate",
        ]),
    },
    BuiltinRole {
        name: "Auditor",
        description: "Role with read-only access",
        grants: Grants::Suffix(".Audit"),
    },
    BuiltinRole {
        name: "Template manager",
        description: "Role to allow a user to create and manage templates",
        grants: Grants::Only(&[
            "Template.Audit",
            "Template.Allocate",
            "Template.Modify",
            "Image.Audit",
            "Image.Allocate",
        ]),
    },
    BuiltinRole {
        name: "ACL manager",
        description: "Role to allow a user to manage access control",
        grants: Grants::Only(&[
            "User.Audit",
            "Group.Audit",
            "Role.Audit",
            "Privilege.Audit",
            "ACE.Audit",
            "ACE.Allocate",
            "ACE.Modify",
        ]),
    },
    BuiltinRole {
        name: "No Access",
        description: "Role with no privileges",
        grants: Grants::Nothing,
    },
];

impl RbacRepository {
    /// Insert the built-in privileges and roles, in one transaction
    pub async fn seed_builtin_catalog(&self) -> Result<()> {
        self.bounded(async {
            let mut tx = self.begin_write().await?;
            let now = now();

            for (name, description) in BUILTIN_PRIVILEGES {
                sqlx::query(
                    "INSERT OR IGNORE INTO privileges (privilege_id, name, description, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(new_id())
                .bind(name)
                .bind(description)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }

            for role in BUILTIN_ROLES {
                sqlx::query(
                    "INSERT OR IGNORE INTO roles (role_id, name, description, is_builtin, created_at, updated_at)
                     VALUES (?, ?, ?, 1, ?, ?)",
                )
                .bind(new_id())
                .bind(role.name)
                .bind(role.description)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                for (privilege, _) in BUILTIN_PRIVILEGES {
                    if !role.grants.includes(privilege) {
                        continue;
                    }
                    sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO role_privileges (role_id, privilege_id)
                        SELECT r.role_id, p.privilege_id
                        FROM roles r, privileges p
                        WHERE r.name = ? AND p.name = ?
                        "#,
                    )
                    .bind(role.name)
                    .bind(privilege)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            info!(
                "Seeded {} built-in privileges and {} built-in roles",
                BUILTIN_PRIVILEGES.len(),
                BUILTIN_ROLES.len()
            );
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;
    use crate::error::RbacError;
    use crate::rbac::{validate_privilege_name, RoleUpdate};

    #[test]
    fn test_catalog_names_are_valid_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for (name, _) in BUILTIN_PRIVILEGES {
            validate_privilege_name(name).unwrap();
            assert!(seen.insert(*name), "duplicate privilege {}", name);
        }
    }

    #[test]
    fn test_role_grants_reference_catalog() {
        for role in BUILTIN_ROLES {
            if let Grants::Only(names) = role.grants {
                for name in names {
                    assert!(
                        BUILTIN_PRIVILEGES.iter().any(|(p, _)| p == name),
                        "{} grants unknown privilege {}",
                        role.name,
                        name
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let repo = RbacRepository::new(test_pool().await);

        repo.seed_builtin_catalog().await.unwrap();
        repo.seed_builtin_catalog().await.unwrap();

        assert_eq!(
            repo.list_privileges().await.unwrap().len(),
            BUILTIN_PRIVILEGES.len()
        );
        let roles = repo.list_roles().await.unwrap();
        assert_eq!(roles.len(), BUILTIN_ROLES.len());
        assert!(roles.iter().all(|r| r.is_builtin));

        let admin = repo.get_role_by_name("Administrator").await.unwrap().unwrap();
        assert_eq!(admin.privileges.len(), BUILTIN_PRIVILEGES.len());

        let auditor = repo.get_role_by_name("Auditor").await.unwrap().unwrap();
        assert!(auditor.privileges.iter().all(|p| p.name.ends_with(".Audit")));
        assert!(auditor.has_privilege("Project.Audit"));

        let none = repo.get_role_by_name("No Access").await.unwrap().unwrap();
        assert!(none.privileges.is_empty());
    }

    #[tokio::test]
    async fn test_builtin_roles_are_protected() {
        let repo = RbacRepository::new(test_pool().await);
        repo.seed_builtin_catalog().await.unwrap();

        let admin = repo.get_role_by_name("Administrator").await.unwrap().unwrap();

        assert!(matches!(
            repo.delete_role(&admin.role_id).await,
            Err(RbacError::BuiltinRole(_))
        ));
        let update = RoleUpdate {
            description: Some("changed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            repo.update_role(&admin.role_id, &update).await,
            Err(RbacError::BuiltinRole(_))
        ));

        let still_there = repo.get_role(&admin.role_id).await.unwrap().unwrap();
        assert_eq!(still_there, admin);
    }
}
