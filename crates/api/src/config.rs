use std::str::FromStr;

use ontask_core::types::{parse_time_zone, TimeZone, DEFAULT_TIME_ZONE};

use crate::auth::jwt::JwtConfig;

/// API server settings.
///
/// | Env Var                 | Default                 |
/// |-------------------------|-------------------------|
/// | `HOST`                  | `0.0.0.0`               |
/// | `PORT`                  | `3000`                  |
/// | `CORS_ORIGINS`          | `http://localhost:5173` |
/// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
/// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
/// | `ONTASK_TIME_ZONE`      | `+00:00`                |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma-separated in `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// How long shutdown waits for run log persistence to drain.
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    /// Zone for workflows created without one.
    pub time_zone: TimeZone,
}

impl ServerConfig {
    /// # Panics
    ///
    /// Panics on malformed values so a bad deployment fails at startup.
    pub fn from_env() -> Self {
        let zone = env_or("ONTASK_TIME_ZONE", DEFAULT_TIME_ZONE.to_string());
        let time_zone = parse_time_zone(&zone)
            .unwrap_or_else(|| panic!("ONTASK_TIME_ZONE must be a UTC offset such as +10:00, got '{zone}'"));

        Self {
            host: env_or("HOST", "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            cors_origins: split_origins(&env_or("CORS_ORIGINS", "http://localhost:5173".to_string())),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            jwt: JwtConfig::from_env(),
            time_zone,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            split_origins(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn missing_variable_falls_back_to_default() {
        assert_eq!(env_or("ONTASK_TEST_UNSET_PORT", 4242u16), 4242);
    }
}
