use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Configuration for the metering service.
///
/// Loaded from the environment with dev defaults; settings without a default
/// are required when `ENVIRONMENT=prod`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeteringConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub event_store: DatabaseConfig,
    pub rate_plan_service: UpstreamConfig,
    pub subscription_service: UpstreamConfig,
    pub notifier: UpstreamConfig,
    pub credential: CredentialConfig,
    pub monitor: MonitorConfig,
    pub http_client: HttpClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub cadence_minutes: u64,
}

impl MonitorConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_minutes.max(1) * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    pub timeout_seconds: u64,
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl MeteringConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(MeteringConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("metering-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            event_store: DatabaseConfig {
                url: get_env("EVENT_STORE_URL", None, is_prod)?,
                max_connections: parse_env("EVENT_STORE_MAX_CONNECTIONS", 5)?,
                min_connections: parse_env("EVENT_STORE_MIN_CONNECTIONS", 1)?,
            },
            rate_plan_service: UpstreamConfig {
                base_url: get_env("RATE_PLAN_SERVICE_URL", Some("http://localhost:8083"), is_prod)?,
            },
            subscription_service: UpstreamConfig {
                base_url: get_env(
                    "SUBSCRIPTION_SERVICE_URL",
                    Some("http://localhost:8084"),
                    is_prod,
                )?,
            },
            notifier: UpstreamConfig {
                base_url: get_env("NOTIFIER_SERVICE_URL", Some("http://localhost:8095"), is_prod)?,
            },
            credential: CredentialConfig {
                secret: get_env(
                    "CREDENTIAL_SECRET",
                    Some("change-me-please-change-me-32-bytes-min"),
                    is_prod,
                )?,
                issuer: get_env("CREDENTIAL_ISSUER", Some("metering-service"), is_prod)?,
                ttl_seconds: parse_env("CREDENTIAL_TTL_SECONDS", 7200)?,
            },
            monitor: MonitorConfig {
                enabled: parse_env("MONITOR_ENABLED", true)?,
                cadence_minutes: parse_env("MONITOR_CADENCE_MINUTES", 10)?,
            },
            http_client: HttpClientConfig {
                timeout_seconds: parse_env("HTTP_TIMEOUT_SECONDS", 10)?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
