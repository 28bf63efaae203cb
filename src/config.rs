//! Configuration for Turnstile
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Turnstile - session and engagement gateway for a video-sharing platform
#[derive(Parser, Debug, Clone)]
#[command(name = "turnstile")]
#[command(about = "Session and engagement gateway for a video-sharing platform")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores, default secrets)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "turnstile")]
    pub mongodb_db: String,

    /// Secret for signing access tokens (required in production)
    #[arg(long, env = "ACCESS_TOKEN_SECRET")]
    pub access_token_secret: Option<String>,

    /// Secret for signing refresh tokens (required in production)
    #[arg(long, env = "REFRESH_TOKEN_SECRET")]
    pub refresh_token_secret: Option<String>,

    /// Access token expiry in seconds (short-lived, stateless)
    #[arg(long, env = "ACCESS_TOKEN_EXPIRY_SECONDS", default_value = "3600")]
    pub access_token_expiry_seconds: u64,

    /// Refresh token expiry in seconds (long-lived, store-tracked)
    #[arg(long, env = "REFRESH_TOKEN_EXPIRY_SECONDS", default_value = "864000")]
    pub refresh_token_expiry_seconds: u64,

    /// Mark credential cookies Secure (transport-secure only)
    #[arg(long, env = "COOKIE_SECURE", default_value = "true")]
    pub cookie_secure: bool,

    /// SameSite policy for credential cookies (None, Lax, Strict)
    #[arg(long, env = "COOKIE_SAME_SITE", default_value = "None")]
    pub cookie_same_site: String,

    /// Path scope for the refresh token cookie. Narrow this to the refresh
    /// route so the long-lived credential never rides other requests.
    #[arg(long, env = "REFRESH_COOKIE_PATH", default_value = "/")]
    pub refresh_cookie_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

const DEV_ACCESS_SECRET: &str = "dev-only-insecure-access-secret-0123456789";
const DEV_REFRESH_SECRET: &str = "dev-only-insecure-refresh-secret-0123456789";

impl Args {
    /// Effective access token secret (uses default in dev mode)
    pub fn access_secret(&self) -> String {
        if self.dev_mode {
            self.access_token_secret
                .clone()
                .unwrap_or_else(|| DEV_ACCESS_SECRET.to_string())
        } else {
            self.access_token_secret
                .clone()
                .expect("ACCESS_TOKEN_SECRET is required in production mode")
        }
    }

    /// Effective refresh token secret (uses default in dev mode)
    pub fn refresh_secret(&self) -> String {
        if self.dev_mode {
            self.refresh_token_secret
                .clone()
                .unwrap_or_else(|| DEV_REFRESH_SECRET.to_string())
        } else {
            self.refresh_token_secret
                .clone()
                .expect("REFRESH_TOKEN_SECRET is required in production mode")
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.access_token_secret.is_none() {
                return Err("ACCESS_TOKEN_SECRET is required in production mode".to_string());
            }
            if self.refresh_token_secret.is_none() {
                return Err("REFRESH_TOKEN_SECRET is required in production mode".to_string());
            }
        }

        if self.access_token_expiry_seconds >= self.refresh_token_expiry_seconds {
            return Err(
                "ACCESS_TOKEN_EXPIRY_SECONDS must be shorter than REFRESH_TOKEN_EXPIRY_SECONDS"
                    .to_string(),
            );
        }

        match self.cookie_same_site.as_str() {
            "None" | "Lax" | "Strict" => {}
            other => {
                return Err(format!(
                    "COOKIE_SAME_SITE must be None, Lax, or Strict (got '{}')",
                    other
                ))
            }
        }

        Ok(())
    }
}
