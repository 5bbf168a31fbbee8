use serde::Serialize;
use std::collections::BTreeMap;

/// Store ordering key: whole seconds plus an ordinal within the second.
///
/// Serializes as `{"t": .., "i": ..}`; the MongoDB backend writes it as a
/// native BSON timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DocumentTimestamp {
    #[serde(rename = "t")]
    pub seconds: u32,
    #[serde(rename = "i")]
    pub ordinal: u32,
}

/// Nested `exception` entry of a [`LogDocument`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDocument {
    pub message: String,
    /// Always `0`.
    pub code: i32,
    pub stack_trace: String,
}

/// Structured form of a log record, as persisted to the store.
///
/// Field names and nesting are the wire contract read by dashboards and
/// query tools; they must not change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDocument {
    pub timestamp: DocumentTimestamp,
    pub level: String,
    pub thread: u64,
    pub thread_name: Option<String>,
    pub message: String,
    pub logger_name: String,
    pub file_name: Option<String>,
    pub module: Option<String>,
    pub method: Option<String>,
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionDocument>,
    /// Caller-supplied fields, merged into the top level.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogDocument {
    /// The ten keys every document carries, in wire order.
    pub const BASELINE_KEYS: [&'static str; 10] = [
        "timestamp",
        "level",
        "thread",
        "threadName",
        "message",
        "loggerName",
        "fileName",
        "module",
        "method",
        "lineNumber",
    ];

    /// Top-level keys of this document, in wire order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Self::BASELINE_KEYS.to_vec();
        if self.exception.is_some() {
            keys.push("exception");
        }
        keys.extend(self.extra.keys().map(String::as_str));
        keys
    }
}
