use std::path::PathBuf;

use clap::Parser;

/// Settings for the `server` subcommand.
///
/// Every option can also be supplied through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
pub struct ServerConfig {
    #[arg(long, env = "STORAGE_PATH", default_value = "/tmp")]
    pub storage_path: PathBuf,

    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    #[arg(long, env = "METRIC_HOST", default_value = "localhost")]
    pub metric_host: String,

    #[arg(long, env = "METRIC_PORT", default_value = "9100")]
    pub metric_port: u16,

    #[arg(
        long,
        env = "HTTP_USERNAME",
        help = "Username for basic auth (enabled when set together with --http-password)"
    )]
    pub http_username: Option<String>,

    #[arg(
        long,
        env = "HTTP_PASSWORD",
        hide_env_values = true,
        help = "Password for basic auth (enabled when set together with --http-username)"
    )]
    pub http_password: Option<String>,

    #[arg(
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). RUST_LOG takes precedence"
    )]
    pub log_level: String,
}

impl ServerConfig {
    /// Basic auth credentials, only when both halves are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.http_username, &self.http_password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        }
    }
}
