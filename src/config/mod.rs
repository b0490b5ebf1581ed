//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::StoredToken;
use crate::models::UserProfile;

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Room directory service base URL
    pub server_url: Option<String>,
    /// Stored directory-service session token (JWT, 24h)
    pub token: Option<StoredToken>,
    /// Authenticated user profile (from last login)
    pub user: Option<UserProfile>,
    /// Keep the media session handle around for rejoin instead of
    /// destroying it on leave
    #[serde(default)]
    pub retain_session_on_leave: bool,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "rooms-cli", "rooms-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the token)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn server_url(&self) -> String {
        self.server_url
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    pub fn get_token(&self) -> Option<StoredToken> {
        self.token.clone()
    }

    pub fn set_token(&mut self, token: String, expires_in: Option<u64>) {
        self.token = Some(StoredToken::new(token, expires_in));
    }

    pub fn get_user(&self) -> Option<UserProfile> {
        self.user.clone()
    }

    pub fn set_user(&mut self, user: UserProfile) {
        self.user = Some(user);
    }

    pub fn clear_credentials(&mut self) {
        self.token = None;
        self.user = None;
    }
}
