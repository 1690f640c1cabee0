use anyhow::anyhow;
use clap::Subcommand;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::forms::{describe, NewUserForm};
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::models::{CreateUser, Role, UpdateUser};
use crate::validation::Validate;

#[derive(Subcommand)]
pub enum UserCommands {
    #[command(about = "List users")]
    List {
        #[arg(long, help = "Substring of email or name")]
        search: Option<String>,
        #[arg(long, help = "Role name or id")]
        role: Option<String>,
        #[arg(long, help = "active or inactive")]
        status: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    #[command(about = "Show one user with roles and overrides")]
    Show { id: Uuid },

    #[command(about = "Create a user")]
    Create {
        email: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long = "role", value_delimiter = ',', help = "Role names or ids, comma separated")]
        roles: Vec<String>,
        #[arg(long)]
        tenant: Option<Uuid>,
    },

    #[command(about = "Update names, active flag or roles")]
    Update {
        id: Uuid,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long = "role", value_delimiter = ',')]
        roles: Option<Vec<String>>,
    },

    #[command(about = "Deactivate a user")]
    Deactivate { id: Uuid },

    #[command(about = "List roles and their grants")]
    Roles,
}

/// Role references are names or ids
pub fn resolve_roles(refs: &[String], roles: &[Role]) -> anyhow::Result<Vec<Uuid>> {
    refs.iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(|r| {
            roles
                .iter()
                .find(|role| role.name.eq_ignore_ascii_case(r) || role.id.to_string() == r)
                .map(|role| role.id)
                .ok_or_else(|| anyhow!("Unknown role '{}'", r))
        })
        .collect()
}

/// Validate the form, resolve role names, then POST
pub async fn create_user(client: &ApiClient, form: &NewUserForm) -> anyhow::Result<Value> {
    form.validate().map_err(|e| anyhow!(describe(&e)))?;

    let roles: Vec<Role> = client.get("/api/user-management/roles", &[]).await?;
    let request = CreateUser {
        email: form.email.trim().to_string(),
        first_name: form.first_name.clone(),
        last_name: form.last_name.clone(),
        role_ids: resolve_roles(&form.roles, &roles)?,
        tenant_id: form.tenant_id,
        is_active: None,
    };
    client.post("/api/user-management/users", &request).await
}

fn role_names(view: &Value) -> String {
    view["roles"]
        .as_array()
        .map(|roles| {
            roles
                .iter()
                .map(|r| field(r, "name"))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

fn print_users(views: &[Value]) {
    let rows: Vec<Vec<String>> = views
        .iter()
        .map(|v| {
            vec![
                field(v, "id"),
                field(v, "email"),
                match v["isActive"].as_bool() {
                    Some(true) => "active".to_string(),
                    Some(false) => "inactive".to_string(),
                    None => "-".to_string(),
                },
                role_names(v),
            ]
        })
        .collect();
    print_table(&["ID", "EMAIL", "STATUS", "ROLES"], &rows);
}

fn print_view(output_format: &OutputFormat, view: &Value, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => output_json(view),
        OutputFormat::Text => {
            println!("✓ {}", message);
            print_users(std::slice::from_ref(view));
            if let Some(overrides) = view["permissionOverrides"].as_array().filter(|o| !o.is_empty()) {
                println!("\nActive overrides: {}", overrides.len());
            }
            Ok(())
        }
    }
}

pub async fn handle(cmd: UserCommands, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        UserCommands::List {
            search,
            role,
            status,
            page,
            limit,
        } => {
            let mut query = Vec::new();
            if let Some(v) = search {
                query.push(("search", v));
            }
            if let Some(v) = role {
                query.push(("role", v));
            }
            if let Some(v) = status {
                query.push(("status", v));
            }
            if let Some(v) = page {
                query.push(("page", v.to_string()));
            }
            if let Some(v) = limit {
                query.push(("limit", v.to_string()));
            }

            let data: Value = client.get("/api/user-management/users", &query).await?;
            let users = data["users"].as_array().cloned().unwrap_or_default();
            if users.is_empty() {
                return output_empty_collection(&output_format, "users", "No users found");
            }
            match output_format {
                OutputFormat::Json => output_json(&data),
                OutputFormat::Text => {
                    print_users(&users);
                    print_pagination(&data["pagination"]);
                    Ok(())
                }
            }
        }
        UserCommands::Show { id } => {
            let view: Value = client.get(&format!("/api/user-management/users/{}", id), &[]).await?;
            print_view(&output_format, &view, "User")
        }
        UserCommands::Create {
            email,
            first_name,
            last_name,
            roles,
            tenant,
        } => {
            let form = NewUserForm {
                email,
                first_name,
                last_name,
                roles,
                tenant_id: tenant,
            };
            let view = create_user(client, &form).await?;
            print_view(&output_format, &view, "User created")
        }
        UserCommands::Update {
            id,
            first_name,
            last_name,
            active,
            roles,
        } => {
            let mut request = UpdateUser {
                first_name,
                last_name,
                is_active: active,
                role_ids: None,
            };
            // An empty role list fails validation before any request
            if roles.as_ref().map_or(false, |refs| refs.iter().all(|r| r.trim().is_empty())) {
                request.role_ids = Some(Vec::new());
            }
            request.validate().map_err(|e| anyhow!(describe(&e)))?;
            if let Some(refs) = roles.filter(|_| request.role_ids.is_none()) {
                let known: Vec<Role> = client.get("/api/user-management/roles", &[]).await?;
                request.role_ids = Some(resolve_roles(&refs, &known)?);
            }

            let view: Value = client
                .patch(&format!("/api/user-management/users/{}", id), &request)
                .await?;
            print_view(&output_format, &view, "User updated")
        }
        UserCommands::Deactivate { id } => {
            let view: Value = client.delete(&format!("/api/user-management/users/{}", id)).await?;
            print_view(&output_format, &view, "User deactivated")
        }
        UserCommands::Roles => {
            let roles: Vec<Role> = client.get("/api/user-management/roles", &[]).await?;
            match output_format {
                OutputFormat::Json => output_json(&roles),
                OutputFormat::Text => {
                    let rows: Vec<Vec<String>> = roles
                        .iter()
                        .map(|r| {
                            vec![
                                r.id.to_string(),
                                r.name.clone(),
                                r.permissions.len().to_string(),
                                r.description.clone().unwrap_or_default(),
                            ]
                        })
                        .collect();
                    print_table(&["ID", "NAME", "GRANTS", "DESCRIPTION"], &rows);
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn roles_resolve_by_name_or_id() {
        let viewer = Role {
            id: Uuid::new_v4(),
            name: "viewer".into(),
            description: None,
            permissions: vec![],
            created_at: Utc::now(),
        };
        let roles = vec![viewer.clone()];
        let ids = resolve_roles(&["Viewer".into(), viewer.id.to_string()], &roles).unwrap();
        assert_eq!(ids, vec![viewer.id, viewer.id]);
        assert!(resolve_roles(&["owner".into()], &roles).is_err());
    }
}
