//! Authentication against the room directory service.
//!
//! The service issues a short-lived JWT for a name/email pair; the token and
//! the user profile are cached in the local config file.

pub mod tokens;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::models::{LoginRequest, LoginResponse};

pub use tokens::StoredToken;

/// Directory-service tokens are valid for 24 hours.
const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Log in against the directory service and cache the issued token.
pub async fn login(name: &str, email: &str, admin: bool, force: bool) -> Result<()> {
    let mut config = Config::load()?;

    if !force {
        if let Some(token) = config.get_token() {
            if !token.is_expired() {
                println!("Already logged in. Use --force to re-authenticate.");
                return Ok(());
            }
        }
    }

    let url = format!("{}/api/auth/login", config.server_url());
    tracing::debug!("POST {}", url);

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&LoginRequest {
            name: name.to_string(),
            email: email.to_string(),
            is_admin: admin,
        })
        .send()
        .await
        .with_context(|| format!("Login request to {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Login failed ({}): {}", status.as_u16(), body);
    }

    let login: LoginResponse = resp
        .json()
        .await
        .context("Failed to parse login response")?;
    if !login.success {
        bail!("Directory service rejected the login");
    }

    config.set_token(login.token, Some(TOKEN_TTL_SECS));
    config.set_user(login.user.clone());
    config.save()?;

    println!("Logged in as {} <{}>", login.user.name, login.user.email);
    Ok(())
}

/// Clear cached credentials.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_credentials();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.get_token() {
        Some(token) if !token.is_expired() => {
            println!("Token: valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Token: expired (run 'rooms-cli login')"),
        None => println!("Token: none (run 'rooms-cli login')"),
    }

    match config.get_user() {
        Some(user) => {
            println!("User:  {} <{}> (id {})", user.name, user.email, user.id);
            if user.is_admin {
                println!("       admin");
            }
        }
        None => println!("User:  none"),
    }

    println!("Server: {}", config.server_url());
    Ok(())
}
