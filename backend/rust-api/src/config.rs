use serde::Deserialize;
use std::env;

use crate::services::event_publisher::DEFAULT_EVENTS_CHANNEL;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub events_channel: String,
    /// `username:password` for Basic auth on /metrics; `None` closes it.
    pub metrics_auth: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "courseflow".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .or_else(|_| {
                if env == "prod" {
                    return Err(config::ConfigError::NotFound(
                        "JWT_SECRET must be set in production".to_string(),
                    ));
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                Ok("dev-secret-only-for-local-testing".to_string())
            })?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let events_channel = settings
            .get_string("events.channel")
            .or_else(|_| env::var("PROGRESS_EVENTS_CHANNEL"))
            .unwrap_or_else(|_| DEFAULT_EVENTS_CHANNEL.to_string());

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .ok()
            .or_else(|| {
                (env == "dev").then(|| {
                    eprintln!("WARNING: Using default METRICS_AUTH (dev mode only!)");
                    "admin:changeme".to_string()
                })
            });

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            events_channel,
            metrics_auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_are_picked_up() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("MONGO_DATABASE", "courseflow_test");
        env::set_var("PROGRESS_EVENTS_CHANNEL", "test_progress_events");
        env::remove_var("APP_ENV");

        let config = Config::load().unwrap();
        assert_eq!(config.mongo_database, "courseflow_test");
        assert_eq!(config.events_channel, "test_progress_events");

        env::remove_var("MONGO_DATABASE");
        env::remove_var("PROGRESS_EVENTS_CHANNEL");
    }

    #[test]
    #[serial]
    fn production_requires_jwt_secret() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP_ENV", "prod");
        env::remove_var("JWT_SECRET");

        assert!(Config::load().is_err());

        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn metrics_credentials_default_only_in_dev() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::remove_var("METRICS_AUTH");
        env::remove_var("APP_ENV");

        let dev = Config::load().unwrap();
        assert_eq!(dev.metrics_auth.as_deref(), Some("admin:changeme"));

        env::set_var("APP_ENV", "staging");
        let staging = Config::load().unwrap();
        assert!(staging.metrics_auth.is_none());

        env::set_var("METRICS_AUTH", "ops:secret");
        let configured = Config::load().unwrap();
        assert_eq!(configured.metrics_auth.as_deref(), Some("ops:secret"));

        env::remove_var("METRICS_AUTH");
        env::remove_var("APP_ENV");
    }
}
