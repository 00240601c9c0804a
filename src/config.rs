use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing mandatory variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Ten years.
const MAX_TTL_MINUTES: u64 = 10 * 365 * 24 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,
    pub base_path: String,
    pub frontend_origin: Option<String>,
    pub receipt_scanner_url: Option<String>,
    pub receipt_scanner_api_key: Option<String>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| dotenv::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        fn parsed<T: std::str::FromStr>(
            name: &'static str,
            raw: Option<String>,
            default: T,
        ) -> Result<T, ConfigError> {
            match raw {
                Some(value) => value
                    .trim()
                    .parse::<T>()
                    .map_err(|_| ConfigError::Invalid { name, value }),
                None => Ok(default),
            }
        }

        // mandatory fields
        let database_url = optional("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret = optional("JWT_SECRET").unwrap_or_else(|| "your-jwt-secret".to_string());

        // optional fields; token lifetimes must stay small enough to add to the current time
        let minutes = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let raw = optional(name);
            let value: u64 = parsed(name, raw.clone(), default)?;
            value
                .checked_mul(60)
                .filter(|_| (1..=MAX_TTL_MINUTES).contains(&value))
                .map(Duration::from_secs)
                .ok_or_else(|| ConfigError::Invalid {
                    name,
                    value: raw.unwrap_or_else(|| value.to_string()),
                })
        };
        let access_token_ttl = minutes("JWT_EXPIRES_IN_MINUTES", 15)?;
        let refresh_token_ttl = minutes("REFRESH_TOKEN_EXPIRES_IN_MINUTES", 60)?;
        let max_connection_pooling = parsed("MAX_CONNECTION_POOLING", optional("MAX_CONNECTION_POOLING"), 5)?;
        let port = parsed("PORT", optional("PORT"), 3000)?;
        let log_file = optional("LOG_FILE").unwrap_or_else(|| "app.log".to_string());

        let base_path = optional("BASE_PATH").unwrap_or_else(|| "/api".to_string());
        let base_path = format!("/{}", base_path.trim().trim_matches('/'));
        if base_path == "/" {
            return Err(ConfigError::Invalid {
                name: "BASE_PATH",
                value: base_path,
            });
        }

        Ok(Self {
            database_url,
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            max_connection_pooling,
            port,
            log_file,
            base_path,
            frontend_origin: optional("FRONTEND_ORIGIN"),
            receipt_scanner_url: optional("RECEIPT_SCANNER_URL"),
            receipt_scanner_api_key: optional("RECEIPT_SCANNER_API_KEY"),
        })
    }
}
