use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::formatter::RecordFormatter;
use crate::record::LogRecord;
use crate::store::{StoreClient, StoreCollection, StoreConnector};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Destination for [`LogRecord`]s produced by the logging layer.
///
/// The layer calls `emit` once per record and waits for it to return, so
/// implementations must never fail the caller: errors are handled inside.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist a single record, handling any failure internally.
    async fn emit(&self, record: &LogRecord);

    /// Release backend resources. Calling it more than once is allowed.
    ///
    /// Default implementation is a no-op.
    async fn close(&self) {}
}

/// Callback receiving write failures when `fail_silently` is off.
pub type ErrorHandler = Arc<dyn Fn(&SinkError, &LogRecord) + Send + Sync>;

/// Default [`ErrorHandler`]: report the failure on stderr.
pub fn report_to_stderr(err: &SinkError, record: &LogRecord) {
    eprintln!(
        "--- log sink error ---\n{}\nwhile writing record: logger={} level={} message={:?}",
        err, record.logger_name, record.level, record.message
    );
}

/// Observable lifecycle state of a [`DocumentSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Connected, collection resolved, inserts go through.
    Ready,
    /// Initialization failed with `fail_silently` set; emits are no-ops.
    Failed,
    Closed,
}

#[derive(Default)]
struct Handles {
    client: Option<Box<dyn StoreClient>>,
    collection: Option<Arc<dyn StoreCollection>>,
    authenticated: bool,
    closed: bool,
}

impl Handles {
    fn open(client: Box<dyn StoreClient>, authenticated: bool) -> Self {
        Handles {
            client: Some(client),
            authenticated,
            ..Handles::default()
        }
    }
}

/// Sink that formats records into documents and inserts them into one
/// collection of a document store.
///
/// Construction performs the whole initialization (connect, authenticate,
/// resolve collection). With `fail_silently` set, a store that cannot be
/// reached yields a working but inert sink instead of an error.
///
/// Emits from many threads share the store handles; [`DocumentSink::close`]
/// waits for in-flight emits before releasing them.
pub struct DocumentSink {
    config: SinkConfig,
    formatter: RecordFormatter,
    handles: RwLock<Handles>,
    on_error: ErrorHandler,
}

impl DocumentSink {
    /// Initialize a sink against the store reachable through `connector`.
    ///
    /// **Returns**
    /// - `Err(SinkError::Config)` for an invalid connection target, whatever
    ///   `fail_silently` says.
    /// - `Err(SinkError::Connection | Authentication | ..)` when the store
    ///   cannot be used and `fail_silently` is off. Any opened connection is
    ///   released first.
    /// - `Ok(sink)` otherwise; check [`DocumentSink::status`] to tell a ready
    ///   sink from an inert one.
    pub async fn connect(
        config: SinkConfig,
        connector: &dyn StoreConnector,
    ) -> Result<Self, SinkError> {
        let handles = initialize(&config, connector).await?;
        Ok(DocumentSink {
            config,
            formatter: RecordFormatter::new(),
            handles: RwLock::new(handles),
            on_error: Arc::new(report_to_stderr),
        })
    }

    /// Replace the handler that receives write failures.
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub async fn status(&self) -> SinkStatus {
        let handles = self.handles.read().await;
        if handles.closed {
            SinkStatus::Closed
        } else if handles.collection.is_some() {
            SinkStatus::Ready
        } else {
            SinkStatus::Failed
        }
    }

    /// Format and insert `record`, surfacing the store's answer.
    ///
    /// **Returns**
    /// - `Ok(true)` if the document was inserted.
    /// - `Ok(false)` if the sink is inert or closed and nothing was written.
    /// - `Err(..)` if formatting for the store or the insert failed.
    pub async fn try_emit(&self, record: &LogRecord) -> Result<bool, SinkError> {
        let handles = self.handles.read().await;
        let Some(collection) = handles.collection.as_ref() else {
            return Ok(false);
        };

        let document = self.formatter.format(record);
        collection.insert(&document).await?;
        Ok(true)
    }

    /// Format and insert `record` without ever failing the caller.
    ///
    /// Failures are dropped when `fail_silently` is set and passed to the
    /// error handler otherwise.
    pub async fn emit(&self, record: &LogRecord) {
        if let Err(err) = self.try_emit(record).await {
            if !self.config.fail_silently {
                (self.on_error)(&err, record);
            }
        }
    }

    /// Log out if authenticated, then close the connection.
    ///
    /// Idempotent; later emits become no-ops.
    pub async fn close(&self) {
        let mut handles = self.handles.write().await;
        if handles.closed {
            return;
        }
        release(&mut handles, &self.config.database).await;
        handles.closed = true;
        debug!(
            database = %self.config.database,
            collection = %self.config.collection,
            "log sink closed"
        );
    }
}

#[async_trait]
impl LogSink for DocumentSink {
    async fn emit(&self, record: &LogRecord) {
        DocumentSink::emit(self, record).await
    }

    async fn close(&self) {
        DocumentSink::close(self).await
    }
}

async fn initialize(
    config: &SinkConfig,
    connector: &dyn StoreConnector,
) -> Result<Handles, SinkError> {
    let target = config.target()?;
    debug!(database = %config.database, collection = %config.collection, "connecting log sink");

    let mut client = match connector.connect(&target).await {
        Ok(client) => client,
        Err(err) => return abandon(config, err, Handles::default()).await,
    };

    let mut authenticated = false;
    if let Some(credentials) = config.credentials() {
        if let Err(err) = client.authenticate(&config.database, &credentials).await {
            return abandon(config, err, Handles::open(client, false)).await;
        }
        authenticated = true;
    }

    let collection = match resolve_collection(client.as_ref(), config).await {
        Ok(collection) => collection,
        Err(err) => return abandon(config, err, Handles::open(client, authenticated)).await,
    };

    debug!(
        database = %config.database,
        collection = %config.collection,
        capped = config.capped,
        "log sink ready"
    );
    Ok(Handles {
        client: Some(client),
        collection: Some(collection),
        authenticated,
        closed: false,
    })
}

/// Capped settings only apply when the collection is created; an existing
/// collection is reused as-is.
async fn resolve_collection(
    client: &dyn StoreClient,
    config: &SinkConfig,
) -> Result<Arc<dyn StoreCollection>, SinkError> {
    if let Some(capped) = config.capped_options() {
        match client
            .create_capped_collection(&config.database, &config.collection, &capped)
            .await
        {
            Ok(collection) => return Ok(collection),
            Err(SinkError::CollectionExists(_)) => {
                debug!(
                    collection = %config.collection,
                    "capped collection already exists, reusing it"
                );
            }
            Err(err) => return Err(err),
        }
    }
    client.open_collection(&config.database, &config.collection).await
}

/// Either keep a half-initialized sink inert or release what was opened and
/// fail construction.
async fn abandon(
    config: &SinkConfig,
    err: SinkError,
    mut handles: Handles,
) -> Result<Handles, SinkError> {
    if config.fail_silently && err.is_silenceable() {
        warn!(
            error = %err,
            database = %config.database,
            "document store unavailable, log sink disabled"
        );
        return Ok(handles);
    }
    release(&mut handles, &config.database).await;
    Err(err)
}

async fn release(handles: &mut Handles, database: &str) {
    handles.collection = None;
    if let Some(mut client) = handles.client.take() {
        if handles.authenticated {
            if let Err(err) = client.logout(database).await {
                debug!(error = %err, "log sink logout failed");
            }
        }
        if let Err(err) = client.close().await {
            debug!(error = %err, "log sink close failed");
        }
    }
    handles.authenticated = false;
}
