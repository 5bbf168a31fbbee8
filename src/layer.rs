use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::init::InitError;
use crate::record::{current_thread_id, ExceptionInfo, LogRecord};
use crate::sink::{DocumentSink, LogSink};
use crate::store::StoreConnector;
use chrono::Utc;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

thread_local! {
    static ON_EMITTER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands each one to a [`LogSink`], waiting until the sink is done with it.
///
/// The sink runs on a dedicated emitter thread with its own Tokio runtime,
/// so the layer works from plain threads and from inside async tasks alike.
/// Records are delivered one at a time in the order they were logged.
///
/// Store drivers keep background tasks on the runtime their client was
/// built on. [`DocumentLayer::connect`] builds the sink on the emitter
/// runtime, which keeps running those tasks while logging threads wait.
/// A sink passed to [`DocumentLayer::new`] must not depend on tasks of a
/// runtime whose threads log through this layer.
///
/// Events emitted by this crate itself, or from the emitter thread, are
/// ignored so the sink never logs into itself.
#[derive(Debug)]
pub struct DocumentLayer {
    emitter: UnboundedSender<Delivery>,
    min_level: Level,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Handed to the sink.
    pub emitted_events: Arc<AtomicU64>,
    /// Filtered out by level or origin, or lost because the emitter stopped.
    pub skipped_events: Arc<AtomicU64>,
}

struct Delivery {
    record: LogRecord,
    done: mpsc::SyncSender<()>,
}

impl DocumentLayer {
    /// Create a layer forwarding events at `min_level` or more severe to
    /// `sink`, and start its emitter thread.
    ///
    /// **Returns**
    /// - `Err(InitError::Emitter)` if the emitter runtime or thread could not
    ///   be created.
    pub fn new(sink: Arc<dyn LogSink>, min_level: Level) -> Result<Self, InitError> {
        Self::start(min_level, move || async move { Ok::<_, SinkError>(sink) })
    }

    /// Start the emitter thread and initialize a [`DocumentSink`] for
    /// `config` on it, forwarding events at the configured level or more
    /// severe.
    ///
    /// Blocks until the sink is initialized.
    ///
    /// **Returns**
    /// - `Err(InitError::Sink)` if the sink could not be initialized, see
    ///   [`DocumentSink::connect`].
    /// - `Err(InitError::Emitter)` if the emitter could not be started.
    pub fn connect(
        config: SinkConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self, InitError> {
        let min_level = config.min_level()?;
        Self::start(min_level, move || async move {
            let sink = DocumentSink::connect(config, connector.as_ref()).await?;
            Ok::<_, SinkError>(Arc::new(sink) as Arc<dyn LogSink>)
        })
    }

    fn start<F, Fut>(min_level: Level, open: F) -> Result<Self, InitError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn LogSink>, SinkError>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (tx, mut rx) = unbounded_channel::<Delivery>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), SinkError>>(1);

        thread::Builder::new()
            .name("log-sink-emitter".to_string())
            .spawn(move || {
                ON_EMITTER_THREAD.with(|flag| flag.set(true));
                runtime.block_on(async move {
                    let sink = match open().await {
                        Ok(sink) => sink,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    while let Some(delivery) = rx.recv().await {
                        sink.emit(&delivery.record).await;
                        let _ = delivery.done.send(());
                    }
                    sink.close().await;
                });
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(io::Error::other("log sink emitter exited during startup").into());
            }
        }

        Ok(Self {
            emitter: tx,
            min_level,
            total_events: Arc::new(AtomicU64::new(0)),
            emitted_events: Arc::new(AtomicU64::new(0)),
            skipped_events: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Hand `record` to the emitter thread and block until it was written.
    fn deliver(&self, record: LogRecord) {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let delivery = Delivery { record, done: done_tx };
        if self.emitter.send(delivery).is_err() || done_rx.recv().is_err() {
            self.skipped_events.fetch_add(1, Ordering::Relaxed);
            eprintln!("log sink emitter stopped, dropping log record");
            return;
        }
        self.emitted_events.fetch_add(1, Ordering::Relaxed);
    }
}

fn is_own_event(target: &str) -> bool {
    target == env!("CARGO_CRATE_NAME")
        || target.starts_with(concat!(env!("CARGO_CRATE_NAME"), "::"))
}

impl<S> Layer<S> for DocumentLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.min_level
            || is_own_event(meta.target())
            || ON_EMITTER_THREAD.with(Cell::get)
        {
            self.skipped_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut exception: Option<ExceptionInfo> = None;

        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            exception: &mut exception,
        };
        event.record(&mut visitor);

        let record = LogRecord {
            created: Utc::now(),
            level: meta.level().to_string(),
            thread: current_thread_id(),
            thread_name: thread::current().name().map(str::to_string),
            message: message.unwrap_or_default(),
            logger_name: meta.target().to_string(),
            file: meta.file().map(str::to_string),
            module_path: meta.module_path().map(str::to_string),
            function: ctx.event_span(event).map(|span| span.name().to_string()),
            line: meta.line(),
            exception,
            fields,
        };

        self.deliver(record);
    }
}

/// Collects the fields of an event: `message` becomes the record message,
/// the first error value becomes the exception, everything else is an
/// extra field.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
    pub exception: &'a mut Option<ExceptionInfo>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            let value = serde_json::Value::String(value.to_string());
            self.fields.insert(field.name().to_string(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if self.exception.is_none() {
            *self.exception = Some(ExceptionInfo::capture(field.name(), value));
        } else {
            let value = serde_json::Value::String(value.to_string());
            self.fields.insert(field.name().to_string(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            let value = serde_json::Value::String(format!("{:?}", value));
            self.fields.insert(field.name().to_string(), value);
        }
    }
}
