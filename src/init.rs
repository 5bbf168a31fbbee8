use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::layer::DocumentLayer;
use crate::sink::LogSink;
use crate::store::StoreConnector;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the logging layer.
///
/// **Fields**
/// - `min_level`: least severe level forwarded to the sink.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   stacked on top of [`DocumentLayer`] so events are also printed to the
///   console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub min_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            min_level: Level::TRACE,
            enable_stdout: true,
        }
    }
}

impl LayerConfig {
    /// Take the minimum level from a sink configuration.
    pub fn from_sink_config(config: &SinkConfig) -> Result<Self, SinkError> {
        Ok(Self {
            min_level: config.min_level()?,
            ..Self::default()
        })
    }
}

/// Errors from starting the logging layer or installing the global
/// subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to start log sink emitter: {0}")]
    Emitter(#[from] std::io::Error),

    #[error("failed to initialize log sink: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    GlobalDefault(#[from] SetGlobalDefaultError),
}

/// Initialize the global `tracing` subscriber using the provided sink and
/// [`LayerConfig`].
///
/// **Parameters**
/// - `sink`: receives one [`LogRecord`](crate::record::LogRecord) per
///   event, typically a [`DocumentSink`](crate::sink::DocumentSink).
/// - `config`: [`LayerConfig`] controlling level filtering and console
///   output.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`DocumentLayer`] as the global
/// default subscriber, so all `tracing` events in the process are observed
/// by the layer.
pub fn init_tracing_with_config(
    sink: Arc<dyn LogSink>,
    config: LayerConfig,
) -> Result<(), InitError> {
    let layer = DocumentLayer::new(sink, config.min_level)?;
    install(layer, config.enable_stdout)
}

/// Initialize a [`DocumentSink`](crate::sink::DocumentSink) for `config` on
/// the layer's emitter thread and install it as the global subscriber.
///
/// The level filter comes from `config.level`. Prefer this over
/// [`init_tracing_with_config`] for stores whose clients run background
/// tasks, such as MongoDB.
pub fn init_tracing_with_store(
    config: SinkConfig,
    connector: Arc<dyn StoreConnector>,
    enable_stdout: bool,
) -> Result<(), InitError> {
    let layer = DocumentLayer::connect(config, connector)?;
    install(layer, enable_stdout)
}

fn install(layer: DocumentLayer, enable_stdout: bool) -> Result<(), InitError> {
    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn LogSink>) -> Result<(), InitError> {
    init_tracing_with_config(sink, LayerConfig::default())
}
