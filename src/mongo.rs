use crate::config::{CappedOptions, Credentials, SinkConfig};
use crate::document::LogDocument;
use crate::error::SinkError;
use crate::init::InitError;
use crate::layer::DocumentLayer;
use crate::sink::DocumentSink;
use crate::store::{StoreClient, StoreCollection, StoreConnector};
use crate::target::ConnectionTarget;
use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document, Timestamp};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Collection};
use std::sync::Arc;

/// Server error code for "namespace already exists".
const NAMESPACE_EXISTS: i32 = 48;

/// [`StoreConnector`] backed by the official MongoDB driver.
///
/// Connecting pings the server so an unreachable deployment is reported at
/// sink construction rather than on the first insert. How long that takes is
/// governed by driver options such as `serverSelectionTimeoutMS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        MongoConnector
    }
}

impl DocumentSink {
    /// Initialize a sink writing to MongoDB.
    ///
    /// The driver's background tasks run on the calling runtime. To log
    /// through [`DocumentLayer`], use [`DocumentLayer::connect_mongo`].
    pub async fn connect_mongo(config: SinkConfig) -> Result<Self, SinkError> {
        DocumentSink::connect(config, &MongoConnector::new()).await
    }
}

impl DocumentLayer {
    /// Start a layer whose MongoDB sink lives on the emitter's runtime.
    pub fn connect_mongo(config: SinkConfig) -> Result<Self, InitError> {
        DocumentLayer::connect(config, Arc::new(MongoConnector::new()))
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn StoreClient>, SinkError> {
        let options = ClientOptions::parse(target.uri()).await.map_err(connection_error)?;
        let client = Client::with_options(options.clone()).map_err(connection_error)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_error)?;

        Ok(Box::new(MongoClient {
            client: Some(client),
            options,
        }))
    }
}

struct MongoClient {
    client: Option<Client>,
    options: ClientOptions,
}

impl MongoClient {
    fn client(&self) -> Result<&Client, SinkError> {
        self.client
            .as_ref()
            .ok_or_else(|| SinkError::Connection("client already closed".to_string()))
    }
}

#[async_trait]
impl StoreClient for MongoClient {
    /// Credentials are bound to the driver's connection pool, so a second
    /// client is opened with them and replaces the anonymous one once the
    /// server accepted them.
    async fn authenticate(
        &mut self,
        database: &str,
        credentials: &Credentials,
    ) -> Result<(), SinkError> {
        let mut credential = Credential::default();
        credential.username = Some(credentials.username.clone());
        credential.password = Some(credentials.password.clone());
        credential.source = Some(database.to_string());

        let mut options = self.options.clone();
        options.credential = Some(credential);

        let authenticated = Client::with_options(options.clone()).map_err(connection_error)?;
        let ping = authenticated.database(database).run_command(doc! { "ping": 1 }).await;
        if let Err(err) = ping {
            authenticated.shutdown().await;
            return Err(match *err.kind {
                ErrorKind::Authentication { ref message, .. } => SinkError::Authentication {
                    database: database.to_string(),
                    reason: message.clone(),
                },
                _ => connection_error(err),
            });
        }

        if let Some(anonymous) = self.client.replace(authenticated) {
            anonymous.shutdown().await;
        }
        self.options = options;
        Ok(())
    }

    async fn create_capped_collection(
        &self,
        database: &str,
        collection: &str,
        capped: &CappedOptions,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        let db = self.client()?.database(database);
        match db
            .create_collection(collection)
            .capped(true)
            .max(capped.max_documents)
            .size(capped.max_bytes)
            .await
        {
            Ok(()) => Ok(Arc::new(MongoCollection {
                collection: db.collection(collection),
            })),
            Err(err) => match *err.kind {
                ErrorKind::Command(ref command) if command.code == NAMESPACE_EXISTS => {
                    Err(SinkError::CollectionExists(collection.to_string()))
                }
                _ => Err(connection_error(err)),
            },
        }
    }

    async fn open_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        let collection = self.client()?.database(database).collection(collection);
        Ok(Arc::new(MongoCollection { collection }))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
        Ok(())
    }
}

struct MongoCollection {
    collection: Collection<Document>,
}

#[async_trait]
impl StoreCollection for MongoCollection {
    async fn insert(&self, document: &LogDocument) -> Result<(), SinkError> {
        let document = to_bson_document(document)?;
        self.collection
            .insert_one(document)
            .await
            .map_err(|e| SinkError::Insert(e.to_string()))?;
        Ok(())
    }
}

fn connection_error(err: MongoError) -> SinkError {
    match *err.kind {
        ErrorKind::InvalidArgument { ref message, .. } => SinkError::Config(message.clone()),
        _ => SinkError::Connection(err.to_string()),
    }
}

/// Render a [`LogDocument`] as BSON, keeping the wire field order.
///
/// This is where extra field values meet the store's type system: values
/// BSON cannot hold (such as integers beyond `i64`) are rejected here.
pub fn to_bson_document(document: &LogDocument) -> Result<Document, SinkError> {
    let mut bson_doc = Document::new();
    bson_doc.insert(
        "timestamp",
        Bson::Timestamp(Timestamp {
            time: document.timestamp.seconds,
            increment: document.timestamp.ordinal,
        }),
    );
    bson_doc.insert("level", document.level.as_str());
    bson_doc.insert("thread", int64("thread", document.thread)?);
    bson_doc.insert("threadName", document.thread_name.clone());
    bson_doc.insert("message", document.message.as_str());
    bson_doc.insert("loggerName", document.logger_name.as_str());
    bson_doc.insert("fileName", document.file_name.clone());
    bson_doc.insert("module", document.module.clone());
    bson_doc.insert("method", document.method.clone());
    bson_doc.insert("lineNumber", document.line_number.map(|line| Bson::Int64(i64::from(line))));

    if let Some(exception) = &document.exception {
        bson_doc.insert(
            "exception",
            doc! {
                "message": exception.message.as_str(),
                "code": exception.code,
                "stackTrace": exception.stack_trace.as_str(),
            },
        );
    }

    for (key, value) in &document.extra {
        let value = bson::to_bson(value)
            .map_err(|e| SinkError::Format(format!("field `{key}`: {e}")))?;
        bson_doc.insert(key.as_str(), value);
    }
    Ok(bson_doc)
}

fn int64(field: &str, value: u64) -> Result<Bson, SinkError> {
    i64::try_from(value)
        .map(Bson::Int64)
        .map_err(|_| {
            SinkError::Format(format!("field `{field}`: {value} exceeds the BSON integer range"))
        })
}
