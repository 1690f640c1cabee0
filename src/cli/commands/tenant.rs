use anyhow::anyhow;
use clap::Subcommand;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::forms::{describe, NewTenantForm};
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::models::UpdateTenant;
use crate::services::InsightRequest;
use crate::validation::{FieldErrors, Validate};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List tenants")]
    List {
        #[arg(long, help = "Substring of name or domain")]
        search: Option<String>,
        #[arg(long, help = "Status filter, e.g. ACTIVE or ARCHIVED")]
        status: Option<String>,
        #[arg(long, help = "Plan filter, e.g. PRO")]
        plan: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    #[command(about = "Show one tenant")]
    Show { id: Uuid },

    #[command(about = "Create a tenant")]
    Create {
        name: String,
        domain: String,
        #[arg(long)]
        plan: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        brand_color: Option<String>,
        #[arg(long)]
        health_score: Option<u8>,
        #[arg(long)]
        max_users: Option<u32>,
        #[arg(long)]
        description: Option<String>,
    },

    #[command(about = "Update tenant fields")]
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        plan: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        brand_color: Option<String>,
        #[arg(long)]
        health_score: Option<u8>,
        #[arg(long)]
        max_users: Option<u32>,
        #[arg(long)]
        description: Option<String>,
    },

    #[command(about = "Archive a tenant")]
    Archive { id: Uuid },

    #[command(about = "Plan and status breakdown")]
    Analytics,

    #[command(about = "Stream tenant insights")]
    Insights {
        #[arg(long, help = "Limit to one tenant")]
        tenant: Option<Uuid>,
    },
}

fn print_tenants(tenants: &[Value]) {
    let rows: Vec<Vec<String>> = tenants
        .iter()
        .map(|t| {
            vec![
                field(t, "id"),
                field(t, "name"),
                field(t, "domain"),
                field(t, "planType"),
                field(t, "status"),
                field(t, "healthScore"),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "DOMAIN", "PLAN", "STATUS", "HEALTH"], &rows);
}

fn print_tenant(output_format: &OutputFormat, tenant: &Value, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => output_json(tenant),
        OutputFormat::Text => {
            println!("✓ {}", message);
            print_tenants(std::slice::from_ref(tenant));
            Ok(())
        }
    }
}

/// Validate the form, then POST it
pub async fn create_tenant(client: &ApiClient, form: &NewTenantForm) -> anyhow::Result<Value> {
    let request = form.to_request().map_err(|e| anyhow!(describe(&e)))?;
    client.post("/api/tenants", &request).await
}

pub async fn handle(cmd: TenantCommands, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TenantCommands::List {
            search,
            status,
            plan,
            page,
            limit,
        } => {
            let mut query = Vec::new();
            if let Some(v) = search {
                query.push(("search", v));
            }
            if let Some(v) = status {
                query.push(("status", v));
            }
            if let Some(v) = plan {
                query.push(("planType", v));
            }
            if let Some(v) = page {
                query.push(("page", v.to_string()));
            }
            if let Some(v) = limit {
                query.push(("limit", v.to_string()));
            }

            let data: Value = client.get("/api/tenants", &query).await?;
            let tenants = data["tenants"].as_array().cloned().unwrap_or_default();
            if tenants.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenants found");
            }
            match output_format {
                OutputFormat::Json => output_json(&data),
                OutputFormat::Text => {
                    print_tenants(&tenants);
                    print_pagination(&data["pagination"]);
                    Ok(())
                }
            }
        }
        TenantCommands::Show { id } => {
            let tenant: Value = client.get(&format!("/api/tenants/{}", id), &[]).await?;
            print_tenant(&output_format, &tenant, "Tenant")
        }
        TenantCommands::Create {
            name,
            domain,
            plan,
            status,
            brand_color,
            health_score,
            max_users,
            description,
        } => {
            let form = NewTenantForm {
                name,
                domain,
                plan_type: plan,
                status,
                brand_color,
                health_score,
                description,
                max_users,
            };
            let tenant = create_tenant(client, &form).await?;
            print_tenant(&output_format, &tenant, "Tenant created")
        }
        TenantCommands::Update {
            id,
            name,
            domain,
            plan,
            status,
            brand_color,
            health_score,
            max_users,
            description,
        } => {
            let mut errors = FieldErrors::default();
            let mut request = UpdateTenant {
                name,
                domain,
                brand_color,
                health_score,
                max_users,
                description,
                ..Default::default()
            };
            match plan.as_deref().map(str::parse).transpose() {
                Ok(p) => request.plan_type = p,
                Err(e) => errors.add("planType", e),
            }
            match status.as_deref().map(str::parse).transpose() {
                Ok(s) => request.status = s,
                Err(e) => errors.add("status", e),
            }
            errors.into_result().and_then(|_| request.validate()).map_err(|e| anyhow!(describe(&e)))?;

            let tenant: Value = client.put(&format!("/api/tenants/{}", id), &request).await?;
            print_tenant(&output_format, &tenant, "Tenant updated")
        }
        TenantCommands::Archive { id } => {
            let tenant: Value = client.delete(&format!("/api/tenants/{}", id)).await?;
            print_tenant(&output_format, &tenant, "Tenant archived")
        }
        TenantCommands::Analytics => {
            let data: Value = client.get("/api/tenants/analytics", &[]).await?;
            match output_format {
                OutputFormat::Json => output_json(&data),
                OutputFormat::Text => {
                    println!("Tenants: {} active, {} archived", field(&data, "total"), field(&data, "archived"));
                    println!("Average health: {}", field(&data, "averageHealthScore"));
                    for (section, key) in [("By plan", "byPlan"), ("By status", "byStatus")] {
                        println!("\n{}:", section);
                        if let Some(map) = data[key].as_object() {
                            for (name, count) in map {
                                println!("  {:<15} {}", name, count);
                            }
                        }
                    }
                    Ok(())
                }
            }
        }
        TenantCommands::Insights { tenant } => {
            let request = InsightRequest { tenant_id: tenant };
            let count = client
                .stream("/api/tenants/ai-recommendations", &request, |insight| {
                    match output_format {
                        OutputFormat::Json => println!("{}", serde_json::to_string(&insight)?),
                        OutputFormat::Text => println!(
                            "[{:<8}] {} {}: {}",
                            field(&insight, "severity"),
                            field(&insight, "tenantId"),
                            field(&insight, "title"),
                            field(&insight, "message")
                        ),
                    }
                    Ok(())
                })
                .await?;
            if output_format == OutputFormat::Text {
                println!("\n{} insight(s)", count);
            }
            Ok(())
        }
    }
}
