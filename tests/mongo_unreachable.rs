//! MongoDB connector behaviour when nothing listens on the target port.
#![cfg(feature = "mongodb")]

use tracing_mongo_sink::config::SinkConfig;
use tracing_mongo_sink::init::InitError;
use tracing_mongo_sink::layer::DocumentLayer;
use tracing_mongo_sink::record::LogRecord;
use tracing_mongo_sink::{DocumentSink, SinkError, SinkStatus};

fn unreachable_config(fail_silently: bool) -> SinkConfig {
    let mut config = SinkConfig {
        host: "127.0.0.1".into(),
        port: 1,
        fail_silently,
        ..SinkConfig::default()
    };
    config.options.insert("serverSelectionTimeoutMS".into(), "200".into());
    config.options.insert("connectTimeoutMS".into(), "200".into());
    config
}

#[tokio::test]
async fn construction_fails_without_fail_silently() {
    let result = DocumentSink::connect_mongo(unreachable_config(false)).await;
    assert!(matches!(result, Err(SinkError::Connection(_))));
}

#[tokio::test]
async fn construction_degrades_with_fail_silently() {
    let sink = DocumentSink::connect_mongo(unreachable_config(true)).await.unwrap();
    assert_eq!(sink.status().await, SinkStatus::Failed);

    let record = LogRecord::new("INFO", "bmclog", "Hello World");
    sink.emit(&record).await;
    assert!(!sink.try_emit(&record).await.unwrap());

    sink.close().await;
    sink.close().await;
}

#[test]
fn layer_reports_unreachable_store_from_its_emitter() {
    let result = DocumentLayer::connect_mongo(unreachable_config(false));
    assert!(matches!(result, Err(InitError::Sink(SinkError::Connection(_)))));
}
