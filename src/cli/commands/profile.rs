use chrono::Utc;
use clap::Subcommand;
use serde_json::json;

use crate::cli::config::{get_config_dir, load_profile, save_profile, Profile};
use crate::cli::utils::*;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum ProfileCommands {
    #[command(about = "Show the saved profile")]
    Show,

    #[command(about = "Save the API URL and/or token")]
    Set {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },

    #[command(about = "Remove the saved profile")]
    Clear,
}

pub fn handle(cmd: ProfileCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ProfileCommands::Show => {
            let profile = load_profile()?;
            match output_format {
                OutputFormat::Json => output_json(&json!({
                    "apiUrl": profile.api_url(),
                    "token": profile.masked_token(),
                    "updatedAt": profile.updated_at,
                    "configDir": get_config_dir()?.display().to_string(),
                })),
                OutputFormat::Text => {
                    println!("API URL: {}", profile.api_url());
                    println!("Token:   {}", profile.masked_token().unwrap_or_else(|| "(none)".to_string()));
                    if let Some(at) = profile.updated_at {
                        println!("Updated: {}", at.to_rfc3339());
                    }
                    Ok(())
                }
            }
        }
        ProfileCommands::Set { url, token } => {
            if url.is_none() && token.is_none() {
                anyhow::bail!("Nothing to set: pass --url and/or --token");
            }
            if let Some(u) = url.as_deref() {
                url::Url::parse(u).map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", u, e))?;
            }

            let mut profile = load_profile()?;
            if url.is_some() {
                profile.api_url = url;
            }
            if token.is_some() {
                profile.token = token;
            }
            profile.updated_at = Some(Utc::now());
            save_profile(&profile)?;
            output_success(&output_format, "Profile saved", None)
        }
        ProfileCommands::Clear => {
            save_profile(&Profile::default())?;
            output_success(&output_format, "Profile cleared", None)
        }
    }
}
