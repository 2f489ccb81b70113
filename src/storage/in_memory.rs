//! In-memory implementation of Datastore for testing and development

use crate::core::datastore::Datastore;
use crate::core::error::StorageError;
use crate::core::field::FieldValue;
use crate::core::key::{IdValue, Key};
use crate::core::model::Entity;
use crate::core::query::{FetchOptions, Operator, Predicate, Query};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

/// In-memory datastore
///
/// Entities are kept in key order, so unordered queries return them the way
/// a key-ordered datastore would. Query planning mirrors a datastore with
/// single-property indexes only: inequality predicates may target one
/// property, and the first sort order must then be on that property.
#[derive(Clone)]
pub struct InMemoryDatastore {
    entities: Arc<RwLock<BTreeMap<Key, Entity>>>,
    next_id: Arc<AtomicI64>,
    pending_conflicts: Arc<AtomicUsize>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            pending_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` puts fail with a transaction conflict
    pub fn fail_next_puts(&self, n: usize) {
        self.pending_conflicts.store(n, AtomicOrdering::SeqCst);
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Key, Entity>>, StorageError> {
        self.entities.read().map_err(|e| StorageError::Backend {
            message: format!("Failed to acquire read lock: {}", e),
        })
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Key, Entity>>, StorageError> {
        self.entities.write().map_err(|e| StorageError::Backend {
            message: format!("Failed to acquire write lock: {}", e),
        })
    }

    fn check_indexes(query: &Query) -> Result<(), StorageError> {
        let inequalities = query.inequality_properties();
        if inequalities.len() > 1 {
            return Err(StorageError::NeedIndex {
                message: format!(
                    "inequality filters on more than one property: {}",
                    inequalities.join(", ")
                ),
            });
        }
        if let (Some(property), Some(first)) = (inequalities.first(), query.orders().first()) {
            if &first.path.name() != property {
                return Err(StorageError::NeedIndex {
                    message: format!(
                        "first sort order must be on inequality property {}",
                        property
                    ),
                });
            }
        }
        Ok(())
    }

    fn matching(&self, query: &Query) -> Result<Vec<Entity>, StorageError> {
        Self::check_indexes(query)?;
        let entities = self.read()?;

        let mut results: Vec<Entity> = entities
            .iter()
            .filter(|(key, _)| key.kind() == query.kind())
            .filter(|(key, _)| {
                query
                    .ancestor_key()
                    .is_none_or(|ancestor| ancestor.is_ancestor_of(key))
            })
            .filter(|(_, entity)| query.predicates().iter().all(|p| matches(entity, p)))
            .map(|(_, entity)| entity.clone())
            .collect();

        if !query.orders().is_empty() {
            results.sort_by(|a, b| {
                for order in query.orders() {
                    let left = order.path.value(a).unwrap_or(&FieldValue::Null);
                    let right = order.path.value(b).unwrap_or(&FieldValue::Null);
                    let ordering = sort_compare(left, right);
                    let ordering = if order.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(results)
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether any value at the predicate's path satisfies it; missing is null
fn matches(entity: &Entity, predicate: &Predicate) -> bool {
    let values = predicate.path.values(entity);
    let null = FieldValue::Null;
    let candidates = if values.is_empty() { vec![&null] } else { values };

    candidates.into_iter().any(|value| {
        let Some(ordering) = value.compare(&predicate.value) else {
            return false;
        };
        match predicate.op {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    })
}

/// Nulls sort first; incomparable values keep their relative order
fn sort_compare(left: &FieldValue, right: &FieldValue) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get(&self, key: &Key) -> Result<Option<Entity>, StorageError> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn put(&self, mut entity: Entity) -> Result<Key, StorageError> {
        if entity.kind().is_empty() {
            return Err(StorageError::InvalidEntity {
                message: "entity has no kind".to_string(),
            });
        }

        let conflicts = self.pending_conflicts.load(AtomicOrdering::SeqCst);
        if conflicts > 0 {
            self.pending_conflicts
                .store(conflicts - 1, AtomicOrdering::SeqCst);
            return Err(StorageError::Conflict {
                key: entity
                    .key()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| entity.kind().to_string()),
            });
        }

        if entity.id().is_none() {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            entity.assign_id(IdValue::Int(id));
        }
        let key = entity.key().ok_or_else(|| StorageError::Backend {
            message: "entity has no id after allocation".to_string(),
        })?;

        self.write()?.insert(key.clone(), entity);
        Ok(key)
    }

    async fn delete(&self, key: &Key) -> Result<(), StorageError> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn fetch(
        &self,
        query: &Query,
        options: FetchOptions,
    ) -> Result<Vec<Entity>, StorageError> {
        let results = self.matching(query)?.into_iter().skip(options.offset);
        Ok(match options.limit {
            Some(limit) => results.take(limit).collect(),
            None => results.collect(),
        })
    }

    async fn count(&self, query: &Query) -> Result<usize, StorageError> {
        Ok(self.matching(query)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ModelSchema, PropertyDef, PropertyType};

    fn book() -> ModelSchema {
        ModelSchema::new("Book")
            .property(PropertyDef::new("title", PropertyType::String))
            .property(PropertyDef::new("year", PropertyType::Integer))
            .property(PropertyDef::new("rating", PropertyType::Integer))
            .property(PropertyDef::new("tags", PropertyType::String).repeated())
    }

    async fn seeded() -> (InMemoryDatastore, Key) {
        let store = InMemoryDatastore::new();
        let author = store.put(Entity::new("Author").with("name", "Ann")).await.unwrap();
        for (title, year, tags) in [
            ("Emma", 1815, vec!["classic"]),
            ("Dune", 1965, vec!["scifi", "classic"]),
            ("Neuromancer", 1984, vec!["scifi"]),
        ] {
            let tags = FieldValue::List(tags.into_iter().map(FieldValue::from).collect());
            store
                .put(
                    book()
                        .new_entity(Some(author.clone()))
                        .with("title", title)
                        .with("year", year as i64)
                        .with("tags", tags),
                )
                .await
                .unwrap();
        }
        store
            .put(book().new_entity(None).with("title", "Orphan"))
            .await
            .unwrap();
        (store, author)
    }

    #[tokio::test]
    async fn test_put_assigns_ids() {
        let store = InMemoryDatastore::new();
        let key = store.put(Entity::new("Author")).await.unwrap();
        assert_eq!(key, Key::new("Author", 1));
        let named = store
            .put(Entity::new("Author").with_id("ann"))
            .await
            .unwrap();
        assert_eq!(named, Key::new("Author", "ann"));
        assert!(store.get(&named).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ancestor_query() {
        let (store, author) = seeded().await;
        let all = Query::new("Book");
        assert_eq!(store.count(&all).await.unwrap(), 4);
        let scoped = Query::new("Book").ancestor(author);
        assert_eq!(store.count(&scoped).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_repeated_property_equality() {
        let (store, _) = seeded().await;
        let tags = book().resolve("tags").unwrap();
        let query = Query::new("Book").filter(tags, Operator::Eq, FieldValue::from("classic"));
        assert_eq!(store.count(&query).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_property_equals_null() {
        let (store, _) = seeded().await;
        let year = book().resolve("year").unwrap();
        let query = Query::new("Book").filter(year, Operator::Eq, FieldValue::Null);
        let results = store.fetch(&query, FetchOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("title"), Some(&FieldValue::from("Orphan")));
    }

    #[tokio::test]
    async fn test_order_and_slice() {
        let (store, author) = seeded().await;
        let year = book().resolve("year").unwrap();
        let query = Query::new("Book").ancestor(author).order(year, true);
        let page = store
            .fetch(&query, FetchOptions::page(2, 1))
            .await
            .unwrap();
        let titles: Vec<String> = page
            .iter()
            .map(|e| e.get("title").unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["Dune", "Emma"]);
    }

    #[tokio::test]
    async fn test_single_inequality_property_rule() {
        let (store, _) = seeded().await;
        let schema = book();
        let query = Query::new("Book")
            .filter(schema.resolve("year").unwrap(), Operator::Gt, FieldValue::Integer(1900))
            .filter(schema.resolve("rating").unwrap(), Operator::Lt, FieldValue::Integer(3));
        let err = store.count(&query).await.unwrap_err();
        assert!(matches!(err, StorageError::NeedIndex { .. }));

        let range = Query::new("Book")
            .filter(schema.resolve("year").unwrap(), Operator::Gt, FieldValue::Integer(1900))
            .filter(schema.resolve("year").unwrap(), Operator::Lt, FieldValue::Integer(1980));
        assert_eq!(store.count(&range).await.unwrap(), 1);

        let misordered = range.order(schema.resolve("title").unwrap(), false);
        assert!(store.count(&misordered).await.is_err());
    }

    #[tokio::test]
    async fn test_forced_conflicts() {
        let store = InMemoryDatastore::new();
        store.fail_next_puts(1);
        let err = store.put(Entity::new("Author")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert!(store.put(Entity::new("Author")).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, author) = seeded().await;
        store.delete(&author).await.unwrap();
        assert!(store.get(&author).await.unwrap().is_none());
        store.delete(&author).await.unwrap();
    }
}
