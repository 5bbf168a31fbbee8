/// Errors surfaced while configuring, connecting or writing through a
/// [`DocumentSink`](crate::sink::DocumentSink).
///
/// Only configuration problems and (with `fail_silently` off) connection or
/// authentication failures ever reach the caller. `CollectionExists` is
/// recovered internally; `Insert` and `Format` go to the sink's error
/// handler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    Config(String),

    #[error("document store unreachable: {0}")]
    Connection(String),

    #[error("authentication rejected for database `{database}`: {reason}")]
    Authentication { database: String, reason: String },

    #[error("collection `{0}` already exists")]
    CollectionExists(String),

    #[error("insert rejected by document store: {0}")]
    Insert(String),

    #[error("log document is not serializable for the store: {0}")]
    Format(String),
}

impl SinkError {
    /// Whether this error is one the sink swallows when `fail_silently` is set.
    ///
    /// Configuration errors are never silenced.
    pub fn is_silenceable(&self) -> bool {
        !matches!(self, SinkError::Config(_))
    }
}
