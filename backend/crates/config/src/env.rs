use relay_common::error::{RelayError, RelayResult};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> RelayResult<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var_or("PORT", 8080)?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            db_max_connections: parse_var_or("DB_MAX_CONNECTIONS", 10)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn get_var(key: &str) -> RelayResult<String> {
    env::var(key).map_err(|_| RelayError::Config(format!("{key} is required but not set")))
}

pub fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an optional numeric variable. Present-but-garbage is an error rather
/// than a silent fallback.
pub fn parse_var_or<T>(key: &str, default: T) -> RelayResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn config_from_env_succeeds_with_required_vars() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("DATABASE_URL", "postgres://localhost/relay_test");
        env::remove_var("PORT");
        env::remove_var("DB_MAX_CONNECTIONS");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.database_url, "postgres://localhost/relay_test");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_max_connections, 10);

        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_fails_without_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::remove_var("DATABASE_URL");
        let result = AppConfig::from_env();
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("DATABASE_URL", "postgres://localhost/relay_test");
        env::set_var("PORT", "eighty");
        let result = AppConfig::from_env();
        env::remove_var("PORT");
        env::remove_var("DATABASE_URL");

        let err = result.expect_err("port should not parse");
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn bind_addr_formats_correctly() {
        let cfg = AppConfig {
            database_url: String::new(),
            host: "127.0.0.1".to_owned(),
            port: 3000,
            log_level: "debug".to_owned(),
            db_max_connections: 5,
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
    }
}
