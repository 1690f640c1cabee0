use anyhow::anyhow;
use chrono::Utc;
use clap::Args;
use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::cli::config::{load_profile, save_profile};
use crate::cli::utils::*;
use crate::cli::OutputFormat;

#[derive(Args)]
pub struct TokenArgs {
    #[arg(long, default_value = "operator", help = "Token subject, recorded as performedBy")]
    pub subject: String,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long, env = "JWT_SECRET", hide_env_values = true, help = "Signing secret of the target server")]
    pub secret: String,

    #[arg(long, default_value_t = 24)]
    pub hours: u64,

    #[arg(long, help = "Store the token in the profile")]
    pub save: bool,
}

pub fn handle(args: TokenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let claims = Claims::new(args.subject.clone(), args.email, args.hours);
    let token = generate_jwt(&claims, &args.secret).map_err(|e| anyhow!(e.to_string()))?;

    if args.save {
        let mut profile = load_profile()?;
        profile.token = Some(token.clone());
        profile.updated_at = Some(Utc::now());
        save_profile(&profile)?;
    }

    match output_format {
        OutputFormat::Json => output_json(&json!({
            "token": token,
            "subject": args.subject,
            "expiresAt": claims.exp,
            "saved": args.save,
        })),
        OutputFormat::Text => {
            println!("{}", token);
            if args.save {
                eprintln!("✓ Token saved to profile");
            }
            Ok(())
        }
    }
}
