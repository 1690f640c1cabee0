pub mod client;
pub mod commands;
pub mod config;
pub mod forms;
pub mod utils;

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use client::ApiClient;

#[derive(Parser)]
#[command(name = "console")]
#[command(about = "Operator CLI for the tenant console API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, env = "CONSOLE_API_URL", help = "API base URL (defaults to the saved profile)")]
    pub url: Option<String>,

    #[arg(long, global = true, env = "CONSOLE_TOKEN", hide_env_values = true, help = "Bearer token")]
    pub token: Option<String>,

    #[arg(long, global = true, default_value_t = 30, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Saved API URL and token")]
    Profile {
        #[command(subcommand)]
        cmd: commands::profile::ProfileCommands,
    },

    #[command(about = "Mint a development token")]
    Token(commands::token::TokenArgs),

    #[command(about = "Tenant management")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "User management")]
    User {
        #[command(subcommand)]
        cmd: commands::user::UserCommands,
    },

    #[command(about = "Effective permissions and overrides")]
    Permission {
        #[command(subcommand)]
        cmd: commands::permission::PermissionCommands,
    },

    #[command(about = "Audit log")]
    Audit {
        #[command(subcommand)]
        cmd: commands::audit::AuditCommands,
    },

    #[command(about = "Permission recommendations")]
    Recommend {
        #[command(subcommand)]
        cmd: commands::recommend::RecommendCommands,
    },

    #[command(about = "System metrics, optionally polled")]
    Metrics(commands::metrics::MetricsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Client from flags, env vars or the saved profile, in that order
fn connect(url: Option<String>, token: Option<String>, timeout: u64) -> anyhow::Result<ApiClient> {
    let profile = config::load_profile()?;
    let url = url.unwrap_or_else(|| profile.api_url().to_string());
    let token = token.or(profile.token);
    ApiClient::new(&url, token, Duration::from_secs(timeout))
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let Cli {
        url,
        token,
        timeout,
        command,
        ..
    } = cli;

    match command {
        Commands::Profile { cmd } => commands::profile::handle(cmd, output_format),
        Commands::Token(args) => commands::token::handle(args, output_format),
        command => {
            let client = connect(url, token, timeout)?;
            match command {
                Commands::Tenant { cmd } => commands::tenant::handle(cmd, &client, output_format).await,
                Commands::User { cmd } => commands::user::handle(cmd, &client, output_format).await,
                Commands::Permission { cmd } => commands::permission::handle(cmd, &client, output_format).await,
                Commands::Audit { cmd } => commands::audit::handle(cmd, &client, output_format).await,
                Commands::Recommend { cmd } => commands::recommend::handle(cmd, &client, output_format).await,
                Commands::Metrics(args) => commands::metrics::handle(args, &client, output_format).await,
                Commands::Profile { .. } | Commands::Token(_) => Ok(()),
            }
        }
    }
}
