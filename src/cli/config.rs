use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Saved CLI defaults; flags and env vars take precedence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Token shown truncated
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_deref().map(|t| {
            let head: String = t.chars().take(12).collect();
            format!("{}…", head)
        })
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let config_dir = if let Ok(custom_dir) = std::env::var("CONSOLE_CLI_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
        PathBuf::from(home).join(".config").join("tenant-console").join("cli")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    }

    Ok(config_dir)
}

pub fn load_profile() -> anyhow::Result<Profile> {
    let profile_file = get_config_dir()?.join("profile.json");

    if !profile_file.exists() {
        return Ok(Profile::default());
    }

    let content = fs::read_to_string(&profile_file)?;
    let profile: Profile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid profile file {}", profile_file.display()))?;
    Ok(profile)
}

pub fn save_profile(profile: &Profile) -> anyhow::Result<()> {
    let profile_file = get_config_dir()?.join("profile.json");

    let content = serde_json::to_string_pretty(profile)?;
    fs::write(profile_file, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_server() {
        let profile = Profile::default();
        assert_eq!(profile.api_url(), DEFAULT_API_URL);
        assert!(profile.masked_token().is_none());
    }

    #[test]
    fn masks_long_tokens() {
        let profile = Profile {
            token: Some("eyJhbGciOiJIUzI1NiJ9.payload.signature".into()),
            ..Default::default()
        };
        assert_eq!(profile.masked_token().unwrap(), "eyJhbGciOiJI…");
    }
}
