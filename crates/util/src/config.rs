use std::{env, fmt, net::SocketAddr};

use super::{server_bind_address, DEFAULT_DATABASE_URL};

const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 60;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Mail relay settings; absent when outbound email is not configured.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub relay_url: String,
    pub api_key: String,
    pub sender: String,
}

/// Object storage settings; absent when presigning is not configured.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub token_secret: String,
    pub dispatch_interval_secs: u64,
    pub mail: Option<MailConfig>,
    pub blob: Option<BlobConfig>,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let token_secret =
            env::var("APP_TOKEN_SECRET").map_err(|_| ConfigError::Missing("APP_TOKEN_SECRET"))?;
        if token_secret.is_empty() {
            return Err(ConfigError::Missing("APP_TOKEN_SECRET"));
        }

        let dispatch_interval_secs = match env::var("DISPATCH_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidInterval(raw.clone()))?,
            Err(_) => DEFAULT_DISPATCH_INTERVAL_SECS,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            token_secret,
            dispatch_interval_secs,
            mail: mail_config(),
            blob: blob_config(),
        })
    }
}

fn mail_config() -> Option<MailConfig> {
    Some(MailConfig {
        relay_url: env::var("MAIL_RELAY_URL").ok()?,
        api_key: env::var("MAIL_API_KEY").ok()?,
        sender: env::var("MAIL_SENDER").ok()?,
    })
}

fn blob_config() -> Option<BlobConfig> {
    Some(BlobConfig {
        bucket: env::var("S3_BUCKET").ok()?,
        region: env::var("S3_REGION").ok()?,
        access_key_id: env::var("AWS_ACCESS_KEY_ID").ok()?,
        secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok()?,
    })
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    Missing(&'static str),
    InvalidInterval(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Missing(name) => write!(f, "{name} must be set"),
            Self::InvalidInterval(value) => {
                write!(f, "DISPATCH_INTERVAL_SECS must be an integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
