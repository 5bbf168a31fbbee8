//! Seams between [`DocumentSink`](crate::sink::DocumentSink) and the
//! document store client.
//!
//! The sink drives the lifecycle (connect, authenticate, resolve collection,
//! insert, logout, close); implementations only translate each step to their
//! driver and classify failures into [`SinkError`] kinds.

use crate::config::{CappedOptions, Credentials};
use crate::document::LogDocument;
use crate::error::SinkError;
use crate::target::ConnectionTarget;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens client connections to a store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Establish a connection to `target`.
    ///
    /// **Returns**
    /// - `Err(SinkError::Connection)` if the store cannot be reached.
    async fn connect(&self, target: &ConnectionTarget)
        -> Result<Box<dyn StoreClient>, SinkError>;
}

/// An open connection, exclusively owned by one sink.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Authenticate against `database`.
    ///
    /// **Returns**
    /// - `Err(SinkError::Authentication)` if the credentials are rejected.
    async fn authenticate(
        &mut self,
        database: &str,
        credentials: &Credentials,
    ) -> Result<(), SinkError>;

    /// Create a capped collection.
    ///
    /// **Returns**
    /// - `Err(SinkError::CollectionExists)` if a collection with that name
    ///   already exists, whatever its settings.
    async fn create_capped_collection(
        &self,
        database: &str,
        collection: &str,
        capped: &CappedOptions,
    ) -> Result<Arc<dyn StoreCollection>, SinkError>;

    /// Open a collection by name, creating it lazily if the store does so.
    async fn open_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Arc<dyn StoreCollection>, SinkError>;

    /// End the authenticated session on `database`.
    ///
    /// Default implementation is a no-op, for stores that tie
    /// authentication to the connection itself.
    async fn logout(&self, _database: &str) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release the connection. Called at most once by the sink.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Write handle on a single collection.
#[async_trait]
pub trait StoreCollection: Send + Sync {
    /// Insert one document.
    ///
    /// **Returns**
    /// - `Err(SinkError::Format)` if the document cannot be represented in
    ///   the store's format.
    /// - `Err(SinkError::Insert)` if the store rejected the write.
    async fn insert(&self, document: &LogDocument) -> Result<(), SinkError>;
}
