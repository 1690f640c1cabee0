use clap::Subcommand;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::services::{DecisionRequest, GenerateRequest};

#[derive(Subcommand)]
pub enum RecommendCommands {
    #[command(about = "List recommendations")]
    List {
        #[arg(long, help = "PENDING, APPROVED or REJECTED")]
        status: Option<String>,
        #[arg(long)]
        user: Option<Uuid>,
    },

    #[command(about = "Run the recommendation engine")]
    Generate {
        #[arg(long, help = "Only this user")]
        user: Option<Uuid>,
    },

    #[command(about = "Approve and apply a recommendation")]
    Approve {
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    #[command(about = "Reject a recommendation")]
    Reject {
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn print_recommendations(output_format: &OutputFormat, items: &[Value]) -> anyhow::Result<()> {
    if items.is_empty() {
        return output_empty_collection(output_format, "recommendations", "No recommendations");
    }
    match output_format {
        OutputFormat::Json => output_json(&items),
        OutputFormat::Text => {
            let rows: Vec<Vec<String>> = items
                .iter()
                .map(|r| {
                    vec![
                        field(r, "id"),
                        field(r, "kind"),
                        field(r, "actions"),
                        field(r, "status"),
                        field(r, "confidence"),
                        field(r, "rationale"),
                    ]
                })
                .collect();
            print_table(&["ID", "KIND", "ACTIONS", "STATUS", "CONF", "RATIONALE"], &rows);
            Ok(())
        }
    }
}

pub async fn handle(cmd: RecommendCommands, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        RecommendCommands::List { status, user } => {
            let mut query = Vec::new();
            if let Some(v) = status {
                query.push(("status", v));
            }
            if let Some(v) = user {
                query.push(("userId", v.to_string()));
            }
            let items: Vec<Value> = client.get("/api/ai-recommendations/permissions", &query).await?;
            print_recommendations(&output_format, &items)
        }
        RecommendCommands::Generate { user } => {
            let request = GenerateRequest { user_id: user };
            let items: Vec<Value> = client
                .post("/api/ai-recommendations/permissions/generate", &request)
                .await?;
            print_recommendations(&output_format, &items)
        }
        RecommendCommands::Approve { id, reason } => {
            let decision: Value = client
                .post(
                    &format!("/api/ai-recommendations/permissions/{}/approve", id),
                    &DecisionRequest { reason },
                )
                .await?;
            let created = decision
                .get("overrideCreated")
                .map(|o| format!(" (override {})", field(o, "id")))
                .unwrap_or_default();
            output_success(
                &output_format,
                &format!("Recommendation {} approved{}", id, created),
                Some(decision),
            )
        }
        RecommendCommands::Reject { id, reason } => {
            let rec: Value = client
                .post(
                    &format!("/api/ai-recommendations/permissions/{}/reject", id),
                    &DecisionRequest { reason },
                )
                .await?;
            output_success(&output_format, &format!("Recommendation {} rejected", id), Some(rec))
        }
    }
}
