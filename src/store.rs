//! The document store interface the rest of the crate talks to.
//!
//! Paths alternate collection and document segments, as in Firestore:
//! `users/{uid}` is a document, `users/{uid}/mealPlans` a collection.
//! Writes replace whole top-level fields; nested maps are not merged.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::value_kind;

/// A document read back from a collection or query.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub path: String,
    pub data: Value,
}

impl StoredDocument {
    pub fn new(path: &str, data: Value) -> Self {
        Self {
            id: document_id(path).to_string(),
            path: path.to_string(),
            data,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .with_context(|| format!("decoding document {}", self.path))
    }

    /// ID of the document owning this document's collection, e.g. the user
    /// ID for `users/{uid}/mealPlans/{id}`.
    pub fn parent_id(&self) -> Option<&str> {
        let segments: Vec<&str> = self.path.split('/').collect();
        (segments.len() >= 4).then(|| segments[segments.len() - 3])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Keep top-level fields not present in the written document
    pub merge: bool,
}

impl SetOptions {
    pub const MERGE: SetOptions = SetOptions { merge: true };
    pub const REPLACE: SetOptions = SetOptions { merge: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A filtered, ordered read over one collection or a collection group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Document under which to search; `None` for the database root
    pub parent: Option<String>,
    pub collection_id: String,
    /// Match every collection named `collection_id` below `parent`
    pub all_descendants: bool,
    /// Equality filters on (dotted) field paths
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    /// Direct children of a collection path.
    pub fn collection(path: &str) -> Self {
        let (parent, collection_id) = match path.rsplit_once('/') {
            Some((parent, id)) => (Some(parent.to_string()), id.to_string()),
            None => (None, path.to_string()),
        };
        Self {
            parent,
            collection_id,
            ..Default::default()
        }
    }

    /// Every collection with this ID anywhere in the database.
    pub fn collection_group(collection_id: &str) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            all_descendants: true,
            ..Default::default()
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    /// Whether a stored path and document satisfy this query.
    pub fn matches(&self, path: &str, data: &Value) -> bool {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 || segments.len() % 2 != 0 {
            return false;
        }
        let collection_path = &path[..path.len() - segments[segments.len() - 1].len() - 1];
        let parent = self.parent.as_deref().map(|p| format!("{}/", p));

        let in_scope = if self.all_descendants {
            segments[segments.len() - 2] == self.collection_id
                && parent.as_deref().map_or(true, |p| path.starts_with(p))
        } else {
            let expected = match &self.parent {
                Some(p) => format!("{}/{}", p, self.collection_id),
                None => self.collection_id.clone(),
            };
            collection_path == expected
        };

        in_scope
            && self
                .filters
                .iter()
                .all(|(field, value)| field_value(data, field) == Some(value))
    }

    /// Sort matched documents, dropping those without the order field.
    pub fn sort(&self, docs: &mut Vec<StoredDocument>) {
        let Some((field, direction)) = &self.order_by else {
            return;
        };
        docs.retain(|d| field_value(&d.data, field).is_some());
        docs.sort_by(|a, b| {
            let ord = compare_values(field_value(&a.data, field), field_value(&b.data, field));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
    }
}

/// Remote document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `None` when no document exists at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    async fn set(&self, path: &str, doc: Value, options: SetOptions) -> Result<()>;

    /// Replace the given top-level fields of an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn update(&self, path: &str, fields: Value) -> Result<()>;

    /// Add each of `values` to the array at top-level `field`, skipping
    /// values already present. The read and write happen atomically, so
    /// concurrent appends never drop each other.
    ///
    /// A missing or non-array field starts empty. Fails with
    /// [`StoreError::NotFound`] if the document does not exist.
    async fn append(&self, path: &str, field: &str, values: Vec<Value>) -> Result<()>;

    /// Deleting a missing document succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Create a document with a generated ID in `collection`, returning the ID.
    async fn add(&self, collection: &str, doc: Value) -> Result<String>;

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>>;
}

/// Read and decode a document.
pub async fn get_as<T: DeserializeOwned>(store: &dyn DocumentStore, path: &str) -> Result<Option<T>> {
    match store.get(path).await? {
        Some(value) => {
            let decoded = serde_json::from_value(value)
                .with_context(|| format!("decoding document {}", path))?;
            Ok(Some(decoded))
        }
        None => Ok(None),
    }
}

pub fn document_id(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Collections have an odd number of path segments.
pub fn is_collection_path(path: &str) -> bool {
    path.split('/').count() % 2 == 1
}

/// Look up a dotted field path such as `address.city`.
pub fn field_value<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(data, |value, key| value.as_object()?.get(key))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => type_rank(a).cmp(&type_rank(b)),
        },
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

fn as_fields(path: &str, doc: Value) -> Result<Map<String, Value>> {
    match doc {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Malformed {
            path: path.to_string(),
            reason: format!("expected an object, got {}", value_kind(&other)),
        }
        .into()),
    }
}

/// In-process store, used by tests and for composing the client without a backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<BTreeMap<String, Value>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.documents.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, doc: Value, options: SetOptions) -> Result<()> {
        let fields = as_fields(path, doc)?;
        if options.merge && fields.is_empty() {
            return Ok(());
        }
        let mut documents = self.documents.write().await;
        if options.merge {
            if let Some(Value::Object(existing)) = documents.get_mut(path) {
                existing.extend(fields);
                return Ok(());
            }
        }
        documents.insert(path.to_string(), Value::Object(fields));
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        let fields = as_fields(path, fields)?;
        let mut documents = self.documents.write().await;
        match documents.get_mut(path) {
            Some(Value::Object(existing)) => {
                existing.extend(fields);
                Ok(())
            }
            _ => Err(StoreError::NotFound(path.to_string()).into()),
        }
    }

    async fn append(&self, path: &str, field: &str, values: Vec<Value>) -> Result<()> {
        let mut documents = self.documents.write().await;
        let Some(Value::Object(existing)) = documents.get_mut(path) else {
            return Err(StoreError::NotFound(path.to_string()).into());
        };
        let slot = existing.entry(field).or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(items) = slot {
            for value in values {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.documents.write().await.remove(path);
        Ok(())
    }

    async fn add(&self, collection: &str, doc: Value) -> Result<String> {
        let n = self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        let id = format!("doc{:06}", n);
        self.set(&format!("{}/{}", collection, id), doc, SetOptions::REPLACE)
            .await?;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        self.query(&Query::collection(collection)).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>> {
        let documents = self.documents.read().await;
        let mut matched: Vec<StoredDocument> = documents
            .iter()
            .filter(|(path, data)| query.matches(path, data))
            .map(|(path, data)| StoredDocument::new(path, data.clone()))
            .collect();
        query.sort(&mut matched);
        Ok(matched)
    }
}

/// What a subscription watches.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A document or collection path
    Path(String),
    Query(Query),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.to_string())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(path)
    }
}

impl From<Query> for Target {
    fn from(query: Query) -> Self {
        Target::Query(query)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Document(Option<Value>),
    Collection(Vec<StoredDocument>),
}

async fn read_snapshot(store: &dyn DocumentStore, target: &Target) -> Result<Snapshot> {
    match target {
        Target::Path(path) if is_collection_path(path) => {
            Ok(Snapshot::Collection(store.list(path).await?))
        }
        Target::Path(path) => Ok(Snapshot::Document(store.get(path).await?)),
        Target::Query(query) => Ok(Snapshot::Collection(store.query(query).await?)),
    }
}

/// A running subscription. Dropping it also stops the watch.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Watch `target`, calling `on_change` with the first snapshot and then
/// whenever a re-read differs from the last one delivered.
///
/// The target is re-read every `every` (at least [`MIN_POLL_INTERVAL`]);
/// failed reads are logged and retried on the next tick. Must be called from
/// within a tokio runtime.
pub fn subscribe<F>(
    store: Arc<dyn DocumentStore>,
    target: impl Into<Target>,
    every: Duration,
    mut on_change: F,
) -> Subscription
where
    F: FnMut(Snapshot) + Send + 'static,
{
    let target = target.into();
    let every = every.max(MIN_POLL_INTERVAL);
    debug!(?target, ?every, "subscribing");
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Snapshot> = None;
        loop {
            ticker.tick().await;
            let snapshot = match read_snapshot(store.as_ref(), &target).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(?target, "subscription read failed: {:#}", e);
                    continue;
                }
            };
            if last.as_ref() != Some(&snapshot) {
                on_change(snapshot.clone());
                last = Some(snapshot);
            }
        }
    });
    Subscription { handle }
}
