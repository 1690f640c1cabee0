use std::time::Duration;

use clap::Args;
use serde_json::Value;

use crate::cli::client::ApiClient;
use crate::cli::utils::*;
use crate::cli::OutputFormat;

#[derive(Args)]
pub struct MetricsArgs {
    #[arg(long, help = "Poll until interrupted")]
    pub watch: bool,

    #[arg(long, default_value_t = 5, help = "Seconds between polls")]
    pub interval: u64,

    #[arg(long, help = "Stop after this many polls")]
    pub count: Option<u64>,
}

fn print_metrics(output_format: &OutputFormat, m: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(m)?);
            Ok(())
        }
        OutputFormat::Text => {
            println!(
                "{}  up {}s  requests {} (errors {})  tenants {}  users {}  audit {}  pending {}",
                field(m, "timestamp"),
                field(m, "uptimeSeconds"),
                field(&m["requests"], "total"),
                field(&m["requests"], "errors"),
                field(m, "tenants"),
                field(m, "users"),
                field(m, "auditEntries"),
                field(m, "pendingRecommendations"),
            );
            Ok(())
        }
    }
}

pub async fn handle(args: MetricsArgs, client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    if !args.watch && args.count.is_none() {
        let m: Value = client.get("/api/system/metrics", &[]).await?;
        return match output_format {
            OutputFormat::Json => output_json(&m),
            OutputFormat::Text => print_metrics(&output_format, &m),
        };
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    let mut polls = 0u64;
    loop {
        ticker.tick().await;
        let m: Value = client.get("/api/system/metrics", &[]).await?;
        print_metrics(&output_format, &m)?;
        polls += 1;
        if args.count.map_or(false, |c| polls >= c) {
            break;
        }
    }
    Ok(())
}
