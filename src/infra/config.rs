use std::net::SocketAddr;
use std::time::Duration;

use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;

pub struct AppConfig {
    pub database_url: SecretString,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// Upper bound for one webhook request, store transaction included.
    pub webhook_timeout: Duration,
    pub run_migrations: bool,
    /// When set, JSON logs are also written to this file.
    pub log_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url: SecretString = SecretString::new(get_env::<String>("DATABASE_URL").into());

        let bind_addr: SocketAddr = get_env_default(
            "BIND_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 3001)),
        );
        let db_max_connections: u32 = get_env_default("DB_MAX_CONNECTIONS", 5);
        let webhook_timeout_secs: u64 = get_env_default("WEBHOOK_TIMEOUT_SECS", 15);
        let run_migrations: bool = get_env_default("RUN_MIGRATIONS", true);
        let log_file: String = get_env_default("LOG_FILE", String::new());

        Self {
            database_url,
            bind_addr,
            db_max_connections,
            webhook_timeout: Duration::from_secs(webhook_timeout_secs),
            run_migrations,
            log_file: log_file_path(log_file),
        }
    }
}

/// Blank `LOG_FILE` means console logging only.
fn log_file_path(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
