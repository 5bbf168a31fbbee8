use crate::error::SinkError;
use crate::target::ConnectionTarget;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::Level;

/// Configuration for a [`DocumentSink`](crate::sink::DocumentSink).
///
/// Every field has a default, so partial configs deserialize cleanly:
///
/// ```
/// use tracing_mongo_sink::config::SinkConfig;
///
/// let json = r#"{ "database": "bmclog", "capped": true }"#;
/// let config: SinkConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.collection, "logs");
/// assert_eq!(config.port, 27017);
/// ```
///
/// When `url` is set it is used exclusively; `host`, `port` and `options`
/// only apply to the host/port form.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Minimum level forwarded by the layer, e.g. `"info"`.
    pub level: String,
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub collection: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub fail_silently: bool,
    pub capped: bool,
    pub capped_max: u64,
    /// Capped collection size in bytes.
    pub capped_size: u64,
    /// Store options passed through to the connection string.
    pub options: BTreeMap<String, String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            level: "trace".to_string(),
            url: None,
            host: "localhost".to_string(),
            port: 27017,
            database: "logs".to_string(),
            collection: "logs".to_string(),
            username: None,
            password: None,
            fail_silently: false,
            capped: false,
            capped_max: 1000,
            capped_size: 1_000_000,
            options: BTreeMap::new(),
        }
    }
}

impl SinkConfig {
    pub fn target(&self) -> Result<ConnectionTarget, SinkError> {
        ConnectionTarget::from_config(self)
    }

    /// Credentials are used only when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn capped_options(&self) -> Option<CappedOptions> {
        self.capped.then_some(CappedOptions {
            max_documents: self.capped_max,
            max_bytes: self.capped_size,
        })
    }

    pub fn min_level(&self) -> Result<Level, SinkError> {
        self.level
            .parse::<Level>()
            .map_err(|_| SinkError::Config(format!("unknown log level `{}`", self.level)))
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("level", &self.level)
            .field("url", &self.url.as_deref().map(redact_url))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("fail_silently", &self.fail_silently)
            .field("capped", &self.capped)
            .field("capped_max", &self.capped_max)
            .field("capped_size", &self.capped_size)
            .field("options", &self.options)
            .finish()
    }
}

const REDACTED: &str = "[REDACTED]";

/// Strip the `user:password@` part of a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{REDACTED}@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Username/password pair authenticated against the configured database.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Creation-time limits of a capped collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CappedOptions {
    pub max_documents: u64,
    pub max_bytes: u64,
}
