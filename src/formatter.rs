use crate::document::{DocumentTimestamp, ExceptionDocument, LogDocument};
use crate::record::LogRecord;

/// Turns [`LogRecord`]s into [`LogDocument`]s.
///
/// Formatting is pure and total: no I/O, no clock reads, no failure path.
/// Whether every extra value is representable in the target store is checked
/// later, at the store boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFormatter;

impl RecordFormatter {
    /// Names an extra field may not take. Extras using one of these are left
    /// out of the document so they never shadow a baseline key.
    pub const RESERVED_FIELDS: [&'static str; 11] = [
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
        "exception",
    ];

    pub fn new() -> Self {
        RecordFormatter
    }

    pub fn is_reserved(name: &str) -> bool {
        Self::RESERVED_FIELDS.contains(&name)
    }

    pub fn format(&self, record: &LogRecord) -> LogDocument {
        let exception = record.exception.as_ref().map(|exc| ExceptionDocument {
            message: exc.message.clone(),
            code: 0,
            stack_trace: if exc.stack_trace.trim().is_empty() {
                format!("{}: {}", exc.kind, exc.message)
            } else {
                exc.stack_trace.clone()
            },
        });

        let extra = record
            .fields
            .iter()
            .filter(|(key, _)| !Self::is_reserved(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        LogDocument {
            timestamp: Self::timestamp(record),
            level: record.level.clone(),
            thread: record.thread,
            thread_name: record.thread_name.clone(),
            message: record.message.clone(),
            logger_name: record.logger_name.clone(),
            file_name: record.file.clone(),
            module: record.module_path.clone(),
            method: record.function.clone(),
            line_number: record.line,
            exception,
            extra,
        }
    }

    fn timestamp(record: &LogRecord) -> DocumentTimestamp {
        let seconds = record.created.timestamp();
        let seconds = u32::try_from(seconds).unwrap_or(if seconds < 0 { 0 } else { u32::MAX });
        DocumentTimestamp {
            seconds,
            ordinal: record.created.timestamp_subsec_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExceptionInfo;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record() -> LogRecord {
        let mut record = LogRecord::new("INFO", "bmclog", "Hello World")
            .with_location("src/main.rs", "app::main", "main", 157);
        record.created = Utc.timestamp_millis_opt(1_468_844_382_617).unwrap();
        record.thread = 7;
        record.thread_name = Some("main".into());
        record
    }

    fn top_level_keys(doc: &LogDocument) -> Vec<String> {
        let value = serde_json::to_value(doc).unwrap();
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn hello_world_has_exactly_the_baseline_keys() {
        let doc = RecordFormatter::new().format(&record());

        let mut expected: Vec<String> =
            LogDocument::BASELINE_KEYS.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(top_level_keys(&doc), expected);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["message"], "Hello World");
        assert_eq!(value["loggerName"], "bmclog");
        assert_eq!(value["fileName"], "src/main.rs");
        assert_eq!(value["module"], "app::main");
        assert_eq!(value["method"], "main");
        assert_eq!(value["lineNumber"], 157);
        assert_eq!(value["threadName"], "main");
        assert!(value.get("exception").is_none());
    }

    #[test]
    fn timestamp_comes_from_record_creation_time() {
        let doc = RecordFormatter::new().format(&record());
        assert_eq!(doc.timestamp, DocumentTimestamp { seconds: 1_468_844_382, ordinal: 617 });
    }

    #[test]
    fn exception_is_nested_with_zero_code() {
        let record = record().with_exception(ExceptionInfo::new(
            "Exception",
            "exc1",
            "Exception: exc1",
        ));
        let value = serde_json::to_value(RecordFormatter::new().format(&record)).unwrap();

        assert_eq!(
            value["exception"],
            json!({ "message": "exc1", "code": 0, "stackTrace": "Exception: exc1" })
        );
    }

    #[test]
    fn empty_stack_trace_falls_back_to_kind_and_message() {
        let record = LogRecord::new("ERROR", "app", "boom")
            .with_exception(ExceptionInfo::new("E", "m", ""));
        let doc = RecordFormatter::new().format(&record);

        let exception = doc.exception.unwrap();
        assert_eq!(exception.stack_trace, "E: m");
        assert_eq!(exception.code, 0);
    }

    #[test]
    fn extension_fields_are_record_fields_minus_reserved() {
        let record = record()
            .with_field("order_id", 123)
            .with_field("tags", json!({ "region": "eu" }))
            .with_field("message", "shadow");
        let doc = RecordFormatter::new().format(&record);

        let extra: Vec<&str> = doc.extra.keys().map(String::as_str).collect();
        assert_eq!(extra, vec!["order_id", "tags"]);
        assert_eq!(doc.message, "Hello World");

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["order_id"], 123);
        assert_eq!(value["tags"]["region"], "eu");
    }

    #[test]
    fn formatting_is_repeatable() {
        let record = record().with_field("attempt", 2);
        let formatter = RecordFormatter::new();
        assert_eq!(formatter.format(&record), formatter.format(&record));
    }

    #[test]
    fn keys_match_serialized_shape() {
        let record = record()
            .with_field("b", 1)
            .with_exception(ExceptionInfo::new("E", "m", "E: m"));
        let doc = RecordFormatter::new().format(&record);

        let mut keys: Vec<String> = doc.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, top_level_keys(&doc));
    }
}
