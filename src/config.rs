use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_expires_hours: i64,
    pub bcrypt_cost: u32,
    pub host: String,
    pub port: u16,
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let environment = match lookup("APP_ENV").as_deref() {
            Some("development") => Environment::Development,
            _ => Environment::Production,
        };

        let cors_origins = lookup("CORS_ORIGIN")
            .unwrap_or_else(|| "http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "taskify".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expires_hours: parse_or(&lookup, "JWT_EXPIRES_HOURS", 168)?,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 5001)?,
            cors_origins,
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|origin| origin == "*")
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("MONGO_URI", "mongodb://localhost"), ("JWT_SECRET", "s")]).unwrap();
        assert_eq!(config.database_name, "taskify");
        assert_eq!(config.port, 5001);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173".to_string()]);
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.allows_any_origin());
    }

    #[test]
    fn missing_and_invalid_values() {
        assert!(matches!(
            config(&[("JWT_SECRET", "s")]),
            Err(ConfigError::Missing("MONGO_URI"))
        ));
        assert!(matches!(
            config(&[("MONGO_URI", "m"), ("JWT_SECRET", "s"), ("PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = config(&[
            ("MONGO_URI", "m"),
            ("JWT_SECRET", "s"),
            ("CORS_ORIGIN", "http://a.test, *"),
            ("APP_ENV", "development"),
        ])
        .unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test".to_string(), "*".to_string()]);
        assert!(config.allows_any_origin());
        assert!(config.is_development());
    }
}
