use loppis_core::Address;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Rate limiting is disabled without Redis.
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    pub carrier: CarrierConfig,
    #[serde(default)]
    pub fulfillment: FulfillmentConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CarrierConfig {
    pub api_key: String,
    /// `sandbox` or `production`
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Overrides the environment's base URL.
    pub base_url: Option<String>,
    pub customer_number: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_environment() -> String {
    "sandbox".into()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_locale() -> String {
    "en".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FulfillmentConfig {
    #[serde(default = "default_carrier_name")]
    pub carrier_name: String,
    #[serde(default = "default_service_code")]
    pub default_service_code: String,
    #[serde(default = "default_record_retry_attempts")]
    pub record_retry_attempts: u32,
    #[serde(default = "default_record_retry_backoff_ms")]
    pub record_retry_backoff_ms: u64,
    pub default_sender: Option<SenderConfig>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            carrier_name: default_carrier_name(),
            default_service_code: default_service_code(),
            record_retry_attempts: default_record_retry_attempts(),
            record_retry_backoff_ms: default_record_retry_backoff_ms(),
            default_sender: None,
        }
    }
}

fn default_carrier_name() -> String {
    "postnord".into()
}

fn default_service_code() -> String {
    "17".into()
}

fn default_record_retry_attempts() -> u32 {
    3
}

fn default_record_retry_backoff_ms() -> u64 {
    200
}

/// Snake-case mirror of [`Address`]; environment keys are lower-cased by the
/// loader so camelCase names would never match.
#[derive(Debug, Deserialize, Clone)]
pub struct SenderConfig {
    pub name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl From<SenderConfig> for Address {
    fn from(s: SenderConfig) -> Self {
        Address {
            name: s.name,
            street: s.street,
            city: s.city,
            postal_code: s.postal_code,
            country_code: s.country_code,
            phone: s.phone.map(Into::into),
            email: s.email.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `LOPPIS_CARRIER__API_KEY=...` sets `carrier.api_key`
            .add_source(config::Environment::with_prefix("LOPPIS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = from_toml(
            r#"
            [server]
            port = 8080
            [database]
            url = "postgres://localhost/loppis"
            [auth]
            jwt_secret = "secret"
            [carrier]
            api_key = "key"
            customer_number = "1234567890"
            "#,
        )
        .unwrap();

        assert!(config.redis.is_none());
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.carrier.environment, "sandbox");
        assert_eq!(config.carrier.timeout_seconds, 10);
        assert_eq!(config.fulfillment.default_service_code, "17");
        assert_eq!(config.fulfillment.record_retry_attempts, 3);
        assert_eq!(config.rate_limit.requests, 100);
    }

    #[test]
    fn test_default_sender_becomes_address() {
        let config = from_toml(
            r#"
            [server]
            port = 8080
            [database]
            url = "postgres://localhost/loppis"
            [auth]
            jwt_secret = "secret"
            [carrier]
            api_key = "key"
            customer_number = "1234567890"
            [fulfillment.default_sender]
            name = "Loppis Lager"
            street = "Lagervägen 3"
            city = "Borås"
            postal_code = "504 62"
            country_code = "SE"
            "#,
        )
        .unwrap();

        let sender: Address = config.fulfillment.default_sender.unwrap().into();
        assert_eq!(sender.postal_code, "504 62");
        assert!(sender.validate().is_ok());
    }
}
