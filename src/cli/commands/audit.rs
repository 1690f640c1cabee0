use clap::Subcommand;
use serde_json::Value;

use crate::cli::client::ApiClient;
use crate::cli::utils::*;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum AuditCommands {
    #[command(about = "List audit entries, newest first")]
    List {
        #[arg(long, help = "USER, ROLE, MENU_PERMISSION or SYSTEM")]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long, help = "e.g. OVERRIDDEN")]
        action: Option<String>,
        #[arg(long, help = "RFC 3339 timestamp or YYYY-MM-DD")]
        from: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },

    #[command(about = "Verify the audit hash chain")]
    Verify,
}

pub async fn handle(cmd: AuditCommands, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::List {
            entity_type,
            entity_id,
            action,
            from,
            page,
            limit,
        } => {
            let query: Vec<(&str, String)> = [
                ("entityType", entity_type),
                ("entityId", entity_id),
                ("action", action),
                ("dateFrom", from),
                ("page", page.map(|p| p.to_string())),
                ("limit", limit.map(|l| l.to_string())),
            ]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();

            let data: Value = client.get("/api/permission-engine/audit", &query).await?;
            let entries = data["entries"].as_array().cloned().unwrap_or_default();
            if entries.is_empty() {
                return output_empty_collection(&output_format, "entries", "No audit entries");
            }
            match output_format {
                OutputFormat::Json => output_json(&data),
                OutputFormat::Text => {
                    let rows: Vec<Vec<String>> = entries
                        .iter()
                        .map(|e| {
                            vec![
                                field(e, "sequence"),
                                field(e, "performedAt"),
                                field(e, "entityType"),
                                field(e, "entityId"),
                                field(e, "action"),
                                field(e, "aiRiskScore"),
                                field(e, "performedBy"),
                                field(e, "reason"),
                            ]
                        })
                        .collect();
                    print_table(&["SEQ", "AT", "ENTITY", "ID", "ACTION", "RISK", "BY", "REASON"], &rows);
                    print_pagination(&data["pagination"]);
                    Ok(())
                }
            }
        }
        AuditCommands::Verify => {
            let result: Value = client.get("/api/permission-engine/audit/verify", &[]).await?;
            match output_format {
                OutputFormat::Json => output_json(&result),
                OutputFormat::Text => {
                    if result["chainIntact"].as_bool() == Some(true) {
                        println!("✓ Audit chain intact ({} entries)", field(&result, "totalEntries"));
                    } else {
                        println!(
                            "✗ Audit chain broken at sequence {} ({} entries)",
                            field(&result, "firstBreakAt"),
                            field(&result, "totalEntries")
                        );
                    }
                    Ok(())
                }
            }
        }
    }
}
