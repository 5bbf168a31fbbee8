use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;

/// A single log event as captured from the logging pipeline.
///
/// [`DocumentLayer`](crate::layer::DocumentLayer) builds these from
/// `tracing` events, but callers may also construct them directly and hand
/// them to a [`DocumentSink`](crate::sink::DocumentSink).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Moment the event was created, not the moment it is formatted.
    pub created: DateTime<Utc>,
    pub level: String,
    pub thread: u64,
    pub thread_name: Option<String>,
    pub message: String,
    pub logger_name: String,
    pub file: Option<String>,
    pub module_path: Option<String>,
    pub function: Option<String>,
    pub line: Option<u32>,
    pub exception: Option<ExceptionInfo>,
    /// Extra fields attached by the caller.
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a record stamped with the current time and calling thread.
    pub fn new(
        level: impl Into<String>,
        logger_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let current = std::thread::current();
        LogRecord {
            created: Utc::now(),
            level: level.into(),
            thread: current_thread_id(),
            thread_name: current.name().map(str::to_string),
            message: message.into(),
            logger_name: logger_name.into(),
            file: None,
            module_path: None,
            function: None,
            line: None,
            exception: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_location(
        mut self,
        file: impl Into<String>,
        module_path: impl Into<String>,
        function: impl Into<String>,
        line: u32,
    ) -> Self {
        self.file = Some(file.into());
        self.module_path = Some(module_path.into());
        self.function = Some(function.into());
        self.line = Some(line);
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Error details attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    /// Rendered error chain, outermost error first.
    pub stack_trace: String,
}

impl ExceptionInfo {
    /// An empty `stack_trace` is rendered as `"{kind}: {message}"` when the
    /// record is formatted.
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        ExceptionInfo {
            kind: kind.into(),
            message: message.into(),
            stack_trace: stack_trace.into(),
        }
    }

    /// Capture an error and its `source()` chain.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: Error + ?Sized,
    {
        let kind = short_type_name(std::any::type_name::<E>());
        Self::capture(kind, err)
    }

    pub(crate) fn capture<E>(kind: &str, err: &E) -> Self
    where
        E: Error + ?Sized,
    {
        let message = err.to_string();
        let mut stack_trace = format!("{kind}: {message}");
        let mut source = err.source();
        while let Some(cause) = source {
            stack_trace.push_str("\nCaused by: ");
            stack_trace.push_str(&cause.to_string());
            source = cause.source();
        }

        ExceptionInfo {
            kind: kind.to_string(),
            message,
            stack_trace,
        }
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Numeric identifier of the calling thread, stable for the thread's lifetime.
///
/// `std::thread::ThreadId` has no stable integer form, so ids are handed out
/// from a process-wide counter the first time a thread logs.
pub fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    }

    THREAD_ID.with(|id| *id)
}
