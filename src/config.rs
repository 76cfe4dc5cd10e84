//! Configuration for the pomodoro server
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Minimum accepted length for a production JWT secret
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Pomodoro server - tasks, points and deadline notifications
#[derive(Parser, Debug, Clone)]
#[command(name = "pomodoro-server")]
#[command(about = "Task tracking backend with pomodoro points and deadline push notifications")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:2000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store fallback, dev JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "pomodoro")]
    pub mongodb_db: String,

    /// Wrap the task + ledger completion write in a MongoDB transaction.
    /// Requires a replica set; when disabled the write falls back to an
    /// ordered write with a compensating revert of the task.
    #[arg(long, env = "MONGODB_TRANSACTIONS", default_value = "true")]
    pub mongodb_transactions: bool,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds (7 days)
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "604800")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Period of the deadline notifier sweep in seconds
    #[arg(long, env = "NOTIFIER_INTERVAL_SECS", default_value = "30")]
    pub notifier_interval_secs: u64,

    /// A task is "ending soon" when its deadline is at most this many minutes away
    #[arg(long, env = "NOTIFY_WINDOW_MINUTES", default_value = "5")]
    pub notify_window_minutes: u32,

    /// Allowed CORS origins, comma separated ("*" allows any)
    #[arg(
        long,
        env = "CORS_ORIGINS",
        default_value = "http://localhost:5174,http://localhost:5173,*"
    )]
    pub cors_origins: String,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        if self.dev_mode {
            Some(
                self.jwt_secret
                    .clone()
                    .unwrap_or_else(|| "dev-mode-secret-not-for-production-use-123456".to_string()),
            )
        } else {
            self.jwt_secret.clone()
        }
    }

    /// Parsed list of allowed CORS origins
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Pick the `Access-Control-Allow-Origin` value for a request origin.
    ///
    /// Returns None when the origin is not allowed.
    pub fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        let origins = self.cors_origin_list();
        match origin {
            Some(o) if origins.iter().any(|allowed| allowed == o) => Some(o.to_string()),
            _ if origins.iter().any(|allowed| allowed == "*") => Some("*".to_string()),
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn notifier_interval(&self) -> Duration {
        Duration::from_secs(self.notifier_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(s) if s.len() < MIN_JWT_SECRET_LEN => {
                    return Err(format!(
                        "JWT_SECRET must be at least {} characters",
                        MIN_JWT_SECRET_LEN
                    ))
                }
                Some(_) => {}
            }
        }

        if self.notifier_interval_secs == 0 {
            return Err("NOTIFIER_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        Ok(())
    }
}
