//! rbacd - access control administration and privilege checks

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use rbacd::rbac::{Privilege, RbacRepository, Role};
use rbacd::{AccessControl, Config};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Access control engine for the network emulation server
#[derive(Parser, Debug)]
#[command(name = "rbacd", version, about = "Inspect and administer access control")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a user holds a privilege on a resource path
    Check {
        #[arg(long)]
        user: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        privilege: String,
        /// Report which rule decided the outcome
        #[arg(long)]
        explain: bool,
    },
    /// List roles with their privileges
    Roles,
    /// List privileges
    Privileges,
    /// List access control entries
    Aces,
    /// Add a privilege to a role
    Grant {
        #[arg(long)]
        role: String,
        #[arg(long)]
        privilege: String,
    },
    /// Remove a privilege from a role
    Revoke {
        #[arg(long)]
        role: String,
        #[arg(long)]
        privilege: String,
    },
    /// Delete every ACE at or below a resource path
    Purge {
        #[arg(long)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    require_database_path(&config)?;
    let engine = AccessControl::open(&config).await?;
    let rbac = engine.rbac();

    match args.command {
        Command::Check {
            user,
            path,
            privilege,
            explain,
        } => {
            let decision = rbac.explain_privilege(&user, &path, &privilege).await?;
            if explain {
                print_json(&decision)?;
            } else {
                println!("{}", decision.is_allowed());
            }
        }
        Command::Roles => print_json(&rbac.list_roles().await?)?,
        Command::Privileges => print_json(&rbac.list_privileges().await?)?,
        Command::Aces => print_json(&rbac.list_aces().await?)?,
        Command::Grant { role, privilege } => {
            let (role, privilege) = lookup(rbac, &role, &privilege).await?;
            let role = rbac
                .add_privilege_to_role(&role.role_id, &privilege.privilege_id)
                .await?;
            print_json(&role)?;
        }
        Command::Revoke { role, privilege } => {
            let (role, privilege) = lookup(rbac, &role, &privilege).await?;
            let role = rbac
                .remove_privilege_from_role(&role.role_id, &privilege.privilege_id)
                .await?;
            print_json(&role)?;
        }
        Command::Purge { prefix } => {
            let removed = engine.resource_deleted(&prefix).await?;
            println!("{}", removed);
        }
    }

    Ok(())
}

/// The CLI only makes sense against a persistent database
fn require_database_path(config: &Config) -> Result<&str> {
    match config.database.path.as_deref() {
        Some(path) if !path.is_empty() => Ok(path),
        _ => bail!(
            "No database configured. Set database.path in the --config file or RBACD_DATABASE__PATH."
        ),
    }
}

/// Resolve a role and a privilege by name
async fn lookup(rbac: &RbacRepository, role: &str, privilege: &str) -> Result<(Role, Privilege)> {
    let role = rbac
        .get_role_by_name(role)
        .await?
        .ok_or_else(|| anyhow!("Role not found: {}", role))?;
    let privilege = rbac
        .get_privilege_by_name(privilege)
        .await?
        .ok_or_else(|| anyhow!("Privilege not found: {}", privilege))?;
    Ok((role, privilege))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_is_required() {
        let config = Config::default();
        let err = require_database_path(&config).unwrap_err();
        assert!(err.to_string().contains("No database configured"));

        let config = Config::from_toml_str(
            r#"
            [database]
            path = ""
            "#,
        )
        .unwrap();
        assert!(require_database_path(&config).is_err());

        let config = Config::from_toml_str(
            r#"
            [database]
            path = "/var/lib/rbacd/rbac.db"
            "#,
        )
        .unwrap();
        assert_eq!(
            require_database_path(&config).unwrap(),
            "/var/lib/rbacd/rbac.db"
        );
    }
}
