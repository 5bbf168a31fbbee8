//! Environment variable names used by this crate for convenient
//! configuration of sinks from services.
//!
//! These are purely helpers; the sink never reads the environment on
//! its own.

use crate::config::SinkConfig;
use crate::error::SinkError;
use std::str::FromStr;

/// Full MongoDB connection URL, e.g. `mongodb://127.0.0.1:27017`.
pub const LOG_SINK_MONGO_URL_ENV: &str = "LOG_SINK_MONGO_URL";

pub const LOG_SINK_MONGO_HOST_ENV: &str = "LOG_SINK_MONGO_HOST";

pub const LOG_SINK_MONGO_PORT_ENV: &str = "LOG_SINK_MONGO_PORT";

pub const LOG_SINK_MONGO_DATABASE_ENV: &str = "LOG_SINK_MONGO_DATABASE";

pub const LOG_SINK_MONGO_COLLECTION_ENV: &str = "LOG_SINK_MONGO_COLLECTION";

/// Optional user name.
pub const LOG_SINK_MONGO_USERNAME_ENV: &str = "LOG_SINK_MONGO_USERNAME";

/// Optional password.
pub const LOG_SINK_MONGO_PASSWORD_ENV: &str = "LOG_SINK_MONGO_PASSWORD";

/// `true`/`false`; swallow store failures instead of reporting them.
pub const LOG_SINK_FAIL_SILENTLY_ENV: &str = "LOG_SINK_FAIL_SILENTLY";

pub const LOG_SINK_CAPPED_ENV: &str = "LOG_SINK_CAPPED";

pub const LOG_SINK_CAPPED_MAX_ENV: &str = "LOG_SINK_CAPPED_MAX";

/// Capped collection size in bytes.
pub const LOG_SINK_CAPPED_SIZE_ENV: &str = "LOG_SINK_CAPPED_SIZE";

/// Minimum level, e.g. `info`.
pub const LOG_SINK_LEVEL_ENV: &str = "LOG_SINK_LEVEL";

impl SinkConfig {
    /// Build a config from `LOG_SINK_*` environment variables, using
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, SinkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, using the same variable
    /// names as [`SinkConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SinkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SinkConfig::default();

        if let Some(url) = lookup(LOG_SINK_MONGO_URL_ENV) {
            config.url = Some(url);
        }
        if let Some(host) = lookup(LOG_SINK_MONGO_HOST_ENV) {
            config.host = host;
        }
        if let Some(port) = lookup(LOG_SINK_MONGO_PORT_ENV) {
            config.port = parse_var(LOG_SINK_MONGO_PORT_ENV, &port)?;
        }
        if let Some(database) = lookup(LOG_SINK_MONGO_DATABASE_ENV) {
            config.database = database;
        }
        if let Some(collection) = lookup(LOG_SINK_MONGO_COLLECTION_ENV) {
            config.collection = collection;
        }
        config.username = lookup(LOG_SINK_MONGO_USERNAME_ENV);
        config.password = lookup(LOG_SINK_MONGO_PASSWORD_ENV);
        if let Some(flag) = lookup(LOG_SINK_FAIL_SILENTLY_ENV) {
            config.fail_silently = parse_var(LOG_SINK_FAIL_SILENTLY_ENV, &flag)?;
        }
        if let Some(flag) = lookup(LOG_SINK_CAPPED_ENV) {
            config.capped = parse_var(LOG_SINK_CAPPED_ENV, &flag)?;
        }
        if let Some(max) = lookup(LOG_SINK_CAPPED_MAX_ENV) {
            config.capped_max = parse_var(LOG_SINK_CAPPED_MAX_ENV, &max)?;
        }
        if let Some(size) = lookup(LOG_SINK_CAPPED_SIZE_ENV) {
            config.capped_size = parse_var(LOG_SINK_CAPPED_SIZE_ENV, &size)?;
        }
        if let Some(level) = lookup(LOG_SINK_LEVEL_ENV) {
            config.level = level;
        }

        config.min_level()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, SinkError> {
    raw.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| SinkError::Config(format!("{key}: cannot parse `{raw}`")))
}
