use crate::config::{CappedOptions, Credentials};
use crate::document::LogDocument;
use crate::error::SinkError;
use crate::store::{StoreClient, StoreCollection, StoreConnector};
use crate::target::ConnectionTarget;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-process document store.
///
/// Useful for unit tests that need to observe what a sink persisted, and for
/// running the logging pipeline without a database. Capped collections keep
/// their limits and evict the oldest documents like a real store would.
///
/// Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryState {
    reachable: bool,
    insert_error: Option<SinkError>,
    users: Vec<Credentials>,
    collections: BTreeMap<(String, String), MemoryCollectionState>,
    targets: Vec<ConnectionTarget>,
    logouts: usize,
    closes: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        MemoryState {
            reachable: true,
            insert_error: None,
            users: Vec::new(),
            collections: BTreeMap::new(),
            targets: Vec::new(),
            logouts: 0,
            closes: 0,
        }
    }
}

#[derive(Default)]
struct MemoryCollectionState {
    capped: Option<CappedOptions>,
    documents: VecDeque<(LogDocument, u64)>,
    bytes: u64,
}

impl MemoryCollectionState {
    fn push(&mut self, document: LogDocument) {
        let size = serde_json::to_vec(&document).map(|bytes| bytes.len() as u64).unwrap_or(0);
        self.documents.push_back((document, size));
        self.bytes += size;

        if let Some(capped) = self.capped {
            while self.documents.len() > 1
                && (self.documents.len() as u64 > capped.max_documents
                    || self.bytes > capped.max_bytes)
            {
                if let Some((_, evicted)) = self.documents.pop_front() {
                    self.bytes -= evicted;
                }
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user that `authenticate` accepts.
    pub fn with_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.lock().users.push(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Pre-create a collection, capped or not.
    pub fn with_collection(
        self,
        database: &str,
        collection: &str,
        capped: Option<CappedOptions>,
    ) -> Self {
        self.lock().collections.insert(
            (database.to_string(), collection.to_string()),
            MemoryCollectionState {
                capped,
                ..MemoryCollectionState::default()
            },
        );
        self
    }

    /// Make subsequent connection attempts fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make subsequent inserts fail with [`SinkError::Insert`].
    pub fn set_reject_inserts(&self, reject: bool) {
        let err = reject.then(|| SinkError::Insert("writes are rejected".to_string()));
        self.fail_inserts_with(err);
    }

    /// Make subsequent inserts fail with `err`, or succeed again with `None`.
    pub fn fail_inserts_with(&self, err: Option<SinkError>) {
        self.lock().insert_error = err;
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<LogDocument> {
        self.lock()
            .collections
            .get(&(database.to_string(), collection.to_string()))
            .map(|state| state.documents.iter().map(|(doc, _)| doc.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_collection(&self, database: &str, collection: &str) -> bool {
        self.lock()
            .collections
            .contains_key(&(database.to_string(), collection.to_string()))
    }

    /// Limits the collection was created with, `None` if it is not capped.
    pub fn capped_options(&self, database: &str, collection: &str) -> Option<CappedOptions> {
        self.lock()
            .collections
            .get(&(database.to_string(), collection.to_string()))
            .and_then(|state| state.capped)
    }

    /// Target of the most recent connection attempt.
    pub fn last_target(&self) -> Option<ConnectionTarget> {
        self.lock().targets.last().cloned()
    }

    pub fn logout_count(&self) -> usize {
        self.lock().logouts
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn StoreClient>, SinkError> {
        let mut state = self.lock();
        state.targets.push(target.clone());
        if !state.reachable {
            return Err(SinkError::Connection(format!("no store listening at {}", target.uri())));
        }
        Ok(Box::new(MemoryClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn StoreCollection> {
        Arc::new(MemoryCollection {
            state: Arc::clone(&self.state),
            key: (database.to_string(), collection.to_string()),
        })
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn authenticate(
        &mut self,
        database: &str,
        credentials: &Credentials,
    ) -> Result<(), SinkError> {
        if lock(&self.state).users.contains(credentials) {
            Ok(())
        } else {
            Err(SinkError::Authentication {
                database: database.to_string(),
                reason: format!("unknown user `{}`", credentials.username),
            })
        }
    }

    async fn create_capped_collection(
        &self,
        database: &str,
        collection: &str,
        capped: &CappedOptions,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        let key = (database.to_string(), collection.to_string());
        {
            let mut state = lock(&self.state);
            if state.collections.contains_key(&key) {
                return Err(SinkError::CollectionExists(collection.to_string()));
            }
            state.collections.insert(
                key,
                MemoryCollectionState {
                    capped: Some(*capped),
                    ..MemoryCollectionState::default()
                },
            );
        }
        Ok(self.collection(database, collection))
    }

    async fn open_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn StoreCollection>, SinkError> {
        lock(&self.state)
            .collections
            .entry((database.to_string(), collection.to_string()))
            .or_default();
        Ok(self.collection(database, collection))
    }

    async fn logout(&self, _database: &str) -> Result<(), SinkError> {
        lock(&self.state).logouts += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        lock(&self.state).closes += 1;
        Ok(())
    }
}

struct MemoryCollection {
    state: Arc<Mutex<MemoryState>>,
    key: (String, String),
}

#[async_trait]
impl StoreCollection for MemoryCollection {
    async fn insert(&self, document: &LogDocument) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        if let Some(err) = &state.insert_error {
            return Err(err.clone());
        }
        state.collections.entry(self.key.clone()).or_default().push(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::RecordFormatter;
    use crate::record::LogRecord;

    fn target() -> ConnectionTarget {
        ConnectionTarget::Url("mongodb://memory".into())
    }

    fn document(message: &str) -> LogDocument {
        RecordFormatter::new().format(&LogRecord::new("INFO", "test", message))
    }

    #[tokio::test]
    async fn capped_collection_evicts_oldest_documents() {
        let store = MemoryStore::new();
        let client = store.connect(&target()).await.unwrap();
        let capped = CappedOptions { max_documents: 2, max_bytes: 1_000_000 };
        let collection = client.create_capped_collection("logs", "logs", &capped).await.unwrap();

        for message in ["one", "two", "three"] {
            collection.insert(&document(message)).await.unwrap();
        }

        let messages: Vec<String> =
            store.documents("logs", "logs").into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn creating_an_existing_collection_conflicts() {
        let store = MemoryStore::new().with_collection("logs", "logs", None);
        let client = store.connect(&target()).await.unwrap();
        let capped = CappedOptions { max_documents: 10, max_bytes: 1024 };

        let err = client.create_capped_collection("logs", "logs", &capped).await.err().unwrap();
        assert_eq!(err, SinkError::CollectionExists("logs".into()));
        assert_eq!(store.capped_options("logs", "logs"), None);
    }

    #[tokio::test]
    async fn unreachable_store_refuses_connections() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        let result = store.connect(&target()).await;
        assert!(matches!(result, Err(SinkError::Connection(_))));
        assert!(store.last_target().is_some());
    }

    #[tokio::test]
    async fn configured_insert_errors_are_returned() {
        let store = MemoryStore::new();
        let client = store.connect(&target()).await.unwrap();
        let collection = client.open_collection("logs", "logs").await.unwrap();

        store.fail_inserts_with(Some(SinkError::Format("field `huge`".into())));
        let err = collection.insert(&document("one")).await.unwrap_err();
        assert_eq!(err, SinkError::Format("field `huge`".into()));

        store.fail_inserts_with(None);
        collection.insert(&document("two")).await.unwrap();
        assert_eq!(store.documents("logs", "logs").len(), 1);
    }
}
