//! Datastore collaborator trait

use crate::core::error::StorageError;
use crate::core::key::Key;
use crate::core::model::Entity;
use crate::core::query::{FetchOptions, Query};
use async_trait::async_trait;
use futures::future::join_all;

/// Document datastore the admin reads and writes through
///
/// Implementations own storage and consistency. The admin only composes
/// queries and relies on the backend rejecting queries it has no index for
/// with [`StorageError::NeedIndex`].
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch an entity by key
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError>;

    /// Store an entity, assigning an id when it has none; returns its key
    async fn put(&self, entity: Entity) -> Result<Key, StorageError>;

    /// Delete an entity; deleting a missing key is not an error
    async fn delete(&self, key: &Key) -> Result<(), StorageError>;

    /// Run a query
    async fn fetch(&self, query: &Query, options: FetchOptions)
    -> Result<Vec<Entity>, StorageError>;

    /// Count a query's results, ignoring any fetch options
    async fn count(&self, query: &Query) -> Result<usize, StorageError>;
}

/// Load every entity along `key`'s lineage, root first, `key` included
///
/// Missing entities are returned as `None` so callers can still render
/// the breadcrumb from the key alone.
pub async fn load_lineage(
    store: &dyn Datastore,
    key: &Key,
) -> Result<Vec<(Key, Option<Entity>)>, StorageError> {
    let lineage = key.lineage();
    let results = join_all(lineage.iter().map(|k| store.get(k))).await;

    lineage
        .into_iter()
        .zip(results)
        .map(|(k, result)| result.map(|entity| (k, entity)))
        .collect()
}
