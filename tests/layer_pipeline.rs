//! End-to-end: `tracing` macros through the layer into the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::Level;
use tracing_mongo_sink::config::{CappedOptions, Credentials, SinkConfig};
use tracing_mongo_sink::document::LogDocument;
use tracing_mongo_sink::layer::DocumentLayer;
use tracing_mongo_sink::memory::MemoryStore;
use tracing_mongo_sink::store::{StoreClient, StoreCollection, StoreConnector};
use tracing_mongo_sink::target::ConnectionTarget;
use tracing_mongo_sink::{DocumentSink, SinkError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tracing_events_are_stored_as_documents() {
    let store = MemoryStore::new();
    let config = SinkConfig {
        database: "bmclog".into(),
        ..SinkConfig::default()
    };
    let sink = Arc::new(DocumentSink::connect(config, &store).await.unwrap());

    let layer = DocumentLayer::new(sink.clone(), Level::INFO).unwrap();
    let emitted = Arc::clone(&layer.emitted_events);
    let subscriber = Registry::default().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        tracing::debug!("not stored");
        tracing::info!("Hello World");
        tracing::error!(order_id = 123, "order failed");
    });

    assert_eq!(emitted.load(Ordering::Relaxed), 2);

    let docs = store.documents("bmclog", "logs");
    assert_eq!(docs.len(), 2);

    let hello = serde_json::to_value(&docs[0]).unwrap();
    let keys: Vec<&String> = hello.as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 10);
    assert_eq!(hello["level"], "INFO");
    assert_eq!(hello["message"], "Hello World");
    assert_eq!(hello["loggerName"], "layer_pipeline");
    assert!(hello.get("exception").is_none());

    let failed = serde_json::to_value(&docs[1]).unwrap();
    assert_eq!(failed["level"], "ERROR");
    assert_eq!(failed["order_id"], 123);
}

/// Store whose inserts are answered by a worker task spawned on the runtime
/// that opened the connection, like a driver's connection pool.
struct PooledStore {
    inserted: Arc<AtomicUsize>,
}

struct PooledClient {
    checkouts: tokio_mpsc::UnboundedSender<oneshot::Sender<()>>,
    inserted: Arc<AtomicUsize>,
}

struct PooledCollection {
    checkouts: tokio_mpsc::UnboundedSender<oneshot::Sender<()>>,
    inserted: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreConnector for PooledStore {
    async fn connect(
        &self,
        _target: &ConnectionTarget,
    ) -> Result<Box<dyn StoreClient>, SinkError> {
        let (checkouts, mut requests) = tokio_mpsc::unbounded_channel::<oneshot::Sender<()>>();
        tokio::spawn(async move {
            while let Some(reply) = requests.recv().await {
                let _ = reply.send(());
            }
        });
        Ok(Box::new(PooledClient {
            checkouts,
            inserted: Arc::clone(&self.inserted),
        }))
    }
}

#[async_trait]
impl StoreClient for PooledClient {
    async fn authenticate(&mut self, _: &str, _: &Credentials) -> Result<(), SinkError> {
        Ok(())
    }

    async fn create_capped_collection(
        &self,
        database: &str,
        collection: &str,
        _capped: &CappedOptions,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        self.open_collection(database, collection).await
    }

    async fn open_collection(
        &self,
        _database: &str,
        _collection: &str,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        Ok(Arc::new(PooledCollection {
            checkouts: self.checkouts.clone(),
            inserted: Arc::clone(&self.inserted),
        }))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl StoreCollection for PooledCollection {
    async fn insert(&self, _document: &LogDocument) -> Result<(), SinkError> {
        let (reply, checkout) = oneshot::channel();
        self.checkouts
            .send(reply)
            .map_err(|_| SinkError::Connection("pool worker stopped".into()))?;
        checkout
            .await
            .map_err(|_| SinkError::Connection("pool worker dropped the request".into()))?;
        self.inserted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn logging_from_a_current_thread_runtime_returns() {
    let inserted = Arc::new(AtomicUsize::new(0));
    let store = PooledStore {
        inserted: Arc::clone(&inserted),
    };
    let (finished_tx, finished_rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let layer = DocumentLayer::connect(SinkConfig::default(), Arc::new(store)).unwrap();
            let subscriber = Registry::default().with(layer);
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!("Hello World");
            });
        });
        let _ = finished_tx.send(());
    });

    assert!(
        finished_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "logging from a current-thread runtime hung"
    );
    assert_eq!(inserted.load(Ordering::SeqCst), 1);
}

#[test]
fn layer_owned_sink_stores_events_and_closes_on_drop() {
    let store = MemoryStore::new();
    let config = SinkConfig {
        level: "warn".into(),
        ..SinkConfig::default()
    };
    let layer = DocumentLayer::connect(config, Arc::new(store.clone())).unwrap();
    let subscriber = Registry::default().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!("below the configured level");
        tracing::warn!(attempt = 2, "retrying");
    });

    let docs = store.documents("logs", "logs");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].message, "retrying");

    for _ in 0..50 {
        if store.close_count() == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(store.close_count(), 1);
}
