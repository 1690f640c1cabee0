use anyhow::anyhow;
use chrono::Utc;
use clap::Subcommand;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::commands::user::resolve_roles;
use crate::cli::forms::{describe, OverrideForm};
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::models::{PermissionChangeRequest, Role};

#[derive(Subcommand)]
pub enum PermissionCommands {
    #[command(about = "List the menu permission catalog")]
    Catalog,

    #[command(about = "Show a user's effective permissions")]
    Show { user_id: Uuid },

    #[command(about = "Grant or deny actions on one menu for a user")]
    Override {
        user_id: Uuid,
        #[arg(long, help = "Menu key, e.g. tenants")]
        menu: String,
        #[arg(long = "type", help = "GRANT, DENY or CUSTOM")]
        override_type: String,
        #[arg(long, help = "Allowed actions, comma separated")]
        allow: Option<String>,
        #[arg(long, help = "Denied actions, comma separated")]
        deny: Option<String>,
        #[arg(long)]
        expires_in_hours: Option<i64>,
        #[arg(long)]
        reason: Option<String>,
    },

    #[command(about = "Revoke an override")]
    Revoke {
        user_id: Uuid,
        override_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    #[command(about = "Replace a user's roles")]
    Roles {
        user_id: Uuid,
        #[arg(long = "role", value_delimiter = ',', required = true)]
        roles: Vec<String>,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn path(user_id: Uuid) -> String {
    format!("/api/user-management/users/{}/permissions", user_id)
}

fn print_permissions(output_format: &OutputFormat, data: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => output_json(data),
        OutputFormat::Text => {
            println!("User: {}", field(&data["user"], "email"));
            let roles: Vec<String> = data["roles"]
                .as_array()
                .map(|r| r.iter().map(|role| field(role, "name")).collect())
                .unwrap_or_default();
            println!("Roles: {}\n", roles.join(", "));

            let rows: Vec<Vec<String>> = data["effective"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|p| {
                            vec![
                                field(p, "menuKey"),
                                field(p, "allowedActions"),
                                field(p, "deniedActions"),
                                field(p, "source"),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            print_table(&["MENU", "ALLOWED", "DENIED", "SOURCE"], &rows);

            if let Some(overrides) = data["overrides"].as_array().filter(|o| !o.is_empty()) {
                println!("\nActive overrides:");
                for o in overrides {
                    println!(
                        "  {} {} allow={} deny={} expires={}",
                        field(o, "id"),
                        field(o, "overrideType"),
                        field(o, "allowedActions"),
                        field(o, "deniedActions"),
                        field(o, "expiresAt")
                    );
                }
            }
            Ok(())
        }
    }
}

pub async fn handle(cmd: PermissionCommands, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PermissionCommands::Catalog => {
            let menus: Vec<Value> = client.get("/api/permission-engine/menu-permissions", &[]).await?;
            match output_format {
                OutputFormat::Json => output_json(&menus),
                OutputFormat::Text => {
                    let rows: Vec<Vec<String>> = menus
                        .iter()
                        .map(|m| {
                            vec![
                                field(m, "menuKey"),
                                field(m, "menuTitle"),
                                field(m, "module"),
                                field(m, "requiredActions"),
                                field(m, "aiSecurityLevel"),
                            ]
                        })
                        .collect();
                    print_table(&["KEY", "TITLE", "MODULE", "ACTIONS", "LEVEL"], &rows);
                    Ok(())
                }
            }
        }
        PermissionCommands::Show { user_id } => {
            let data: Value = client.get(&path(user_id), &[]).await?;
            print_permissions(&output_format, &data)
        }
        PermissionCommands::Override {
            user_id,
            menu,
            override_type,
            allow,
            deny,
            expires_in_hours,
            reason,
        } => {
            let form = OverrideForm {
                menu_key: menu,
                override_type,
                allow,
                deny,
                expires_in_hours,
                reason,
            };
            let request = form.to_request(Utc::now()).map_err(|e| anyhow!(describe(&e)))?;
            let data: Value = client.post(&path(user_id), &request).await?;
            print_permissions(&output_format, &data)
        }
        PermissionCommands::Revoke {
            user_id,
            override_id,
            reason,
        } => {
            let request = PermissionChangeRequest {
                revoke_override_ids: vec![override_id],
                reason,
                ..Default::default()
            };
            let data: Value = client.post(&path(user_id), &request).await?;
            print_permissions(&output_format, &data)
        }
        PermissionCommands::Roles { user_id, roles, reason } => {
            let known: Vec<Role> = client.get("/api/user-management/roles", &[]).await?;
            let request = PermissionChangeRequest {
                role_ids: Some(resolve_roles(&roles, &known)?),
                reason,
                ..Default::default()
            };
            request
                .validate_at(Utc::now())
                .map_err(|e| anyhow!(describe(&e)))?;
            let data: Value = client.post(&path(user_id), &request).await?;
            print_permissions(&output_format, &data)
        }
    }
}
