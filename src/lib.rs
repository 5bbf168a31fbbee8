pub mod config;
pub mod document;
pub mod error;
pub mod formatter;
pub mod record;
pub mod sink;
pub mod store;
pub mod target;
pub mod layer;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub mod env;
pub mod init;
pub mod memory;

pub use config::SinkConfig;
pub use error::SinkError;
pub use formatter::RecordFormatter;
pub use record::LogRecord;
pub use sink::{DocumentSink, LogSink, SinkStatus};
