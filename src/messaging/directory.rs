//! Lookup of live records from their durable `(kind, id)` references.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::party::{Party, PartyRef};
use super::MessagingError;

/// Finds live records by kind and id.
///
/// Implemented by the host application's record store. Used when decoding
/// the recipient references stored in message metadata.
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Look up a record, returning `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn find(&self, kind: &str, id: i64) -> Result<Option<Party>, MessagingError>;

    /// Look up a record that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::RecipientNotFound`] if the record is gone.
    async fn fetch(&self, reference: &PartyRef) -> Result<Party, MessagingError> {
        self.find(&reference.kind, reference.id)
            .await?
            .ok_or_else(|| MessagingError::RecipientNotFound(reference.clone()))
    }
}

/// Directory backed by an in-process map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    records: Arc<RwLock<HashMap<PartyRef, Party>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record.
    pub async fn insert(&self, party: Party) {
        let mut records = self.records.write().await;
        records.insert(PartyRef::of(&party), party);
    }

    /// Remove a record, returning it if it was present.
    pub async fn remove(&self, reference: &PartyRef) -> Option<Party> {
        let mut records = self.records.write().await;
        records.remove(reference)
    }
}

#[async_trait]
impl PartyDirectory for InMemoryDirectory {
    async fn find(&self, kind: &str, id: i64) -> Result<Option<Party>, MessagingError> {
        let records = self.records.read().await;
        Ok(records.get(&PartyRef::new(kind, id)).cloned())
    }
}
