//! Document sources and the plan runner.
//!
//! A [`DocumentSource`] only has to fetch documents from one collection,
//! optionally narrowed by predicates. [`aggregate`] does the rest, so every
//! source shares the same stage semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::pipeline::{Collection, Document, Pipeline, Predicate, Stage};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch documents from `collection` matching `predicates`.
    ///
    /// Implementations may return a superset; callers re-apply the
    /// predicates in memory.
    async fn fetch(
        &self,
        collection: Collection,
        predicates: &[Predicate],
    ) -> Result<Vec<Document>, StoreError>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

/// Execute a plan against a source.
pub async fn aggregate(
    source: &dyn DocumentSource,
    pipeline: &Pipeline,
) -> Result<Vec<Document>, StoreError> {
    pipeline.validate()?;

    if pipeline.matches_nothing() {
        tracing::debug!(collection = %pipeline.collection(), "plan matches nothing, skipping fetch");
        return Ok(Vec::new());
    }

    let (pushdown, rest) = pipeline.split_pushdown();
    let mut docs: Vec<Document> = source
        .fetch(pipeline.collection(), pushdown)
        .await?
        .into_iter()
        .filter(|doc| pushdown.iter().all(|predicate| predicate.matches(doc)))
        .collect();

    for stage in rest {
        docs = match stage {
            Stage::Lookup(lookup) => {
                let keys = lookup.local_keys(&docs);
                let foreign = if keys.is_empty() {
                    Vec::new()
                } else {
                    let predicate = Predicate::In {
                        path: lookup.foreign_field.clone(),
                        values: keys,
                    };
                    source.fetch(lookup.from, std::slice::from_ref(&predicate)).await?
                };
                stage.apply(docs, &foreign)
            }
            _ => stage.apply(docs, &[]),
        };
    }

    tracing::trace!(
        collection = %pipeline.collection(),
        source = source.name(),
        rows = docs.len(),
        "aggregation finished"
    );
    Ok(docs)
}

/// Run a plan and decode each row.
pub async fn aggregate_as<T: DeserializeOwned>(
    source: &dyn DocumentSource,
    pipeline: &Pipeline,
) -> Result<Vec<T>, StoreError> {
    let rows = aggregate(source, pipeline).await?;
    decode_rows(rows)
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Document>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(StoreError::from))
        .collect()
}

pub async fn find_by_ids<T: DeserializeOwned>(
    source: &dyn DocumentSource,
    collection: Collection,
    ids: &[String],
) -> Result<Vec<T>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let pipeline = Pipeline::on(collection).match_in("_id", ids.iter().cloned());
    aggregate_as(source, &pipeline).await
}

pub async fn find_by_id<T: DeserializeOwned>(
    source: &dyn DocumentSource,
    collection: Collection,
    id: &str,
) -> Result<Option<T>, StoreError> {
    let mut found = find_by_ids(source, collection, &[id.to_string()]).await?;
    Ok(if found.is_empty() {
        None
    } else {
        Some(found.swap_remove(0))
    })
}

/// In-process document source.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a JSON object. Non-objects are rejected.
    pub async fn insert(&self, collection: Collection, doc: Value) -> Result<(), StoreError> {
        let Value::Object(doc) = doc else {
            return Err(StoreError::InvalidPipeline(format!(
                "{collection}: documents must be JSON objects"
            )));
        };
        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .push(doc);
        Ok(())
    }

    pub async fn insert_many(
        &self,
        docs: impl IntoIterator<Item = (Collection, Value)>,
    ) -> Result<(), StoreError> {
        for (collection, doc) in docs {
            self.insert(collection, doc).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for MemoryStore {
    async fn fetch(
        &self,
        collection: Collection,
        predicates: &[Predicate],
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| predicates.iter().all(|predicate| predicate.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Wraps a source and counts fetches.
    pub struct CountingSource<S> {
        pub inner: S,
        fetches: AtomicUsize,
    }

    impl<S> CountingSource<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                fetches: AtomicUsize::new(0),
            }
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<S: DocumentSource> DocumentSource for CountingSource<S> {
        async fn fetch(
            &self,
            collection: Collection,
            predicates: &[Predicate],
        ) -> Result<Vec<Document>, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(collection, predicates).await
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    /// A source whose every fetch fails.
    pub struct FailingSource;

    #[async_trait]
    impl DocumentSource for FailingSource {
        async fn fetch(&self, _: Collection, _: &[Predicate]) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }
}
