//! Embedded document engine: named collections of JSON documents with
//! unique-index enforcement, named counters and an optional JSON snapshot.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::utils::{
    error::{AdapterError, GateResult},
    types::Document,
};

/// Collection holding one sequence document per counter name
pub const COUNTERS_COLLECTION: &str = "counters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIndex {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl CollectionIndex {
    pub fn new(name: &str, fields: &[&str], unique: bool) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        }
    }

    /// Key values of `document`, or `None` when any field is missing or null
    fn key<'a>(&self, document: &'a Document) -> Option<Vec<&'a Value>> {
        self.fields
            .iter()
            .map(|field| document.get(field).filter(|v| !v.is_null()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    indexes: Vec<CollectionIndex>,
    documents: Vec<Document>,
}

impl Collection {
    /// First unique index `candidate` collides on against `others`
    fn unique_conflict<'a, I>(&self, candidate: &Document, others: I) -> Option<&str>
    where
        I: Iterator<Item = &'a Document> + Clone,
    {
        self.indexes.iter().filter(|index| index.unique).find_map(|index| {
            let key = index.key(candidate)?;
            others
                .clone()
                .any(|other| index.key(other).as_ref() == Some(&key))
                .then_some(index.name.as_str())
        })
    }

    /// Set `changes` on every document matching `filter`. Either every match is
    /// updated or, on a unique-index collision, none is.
    fn update_matching(&mut self, name: &str, filter: &Document, changes: &Document) -> GateResult<u64> {
        let mut updated = self.documents.clone();
        let mut count = 0;
        for document in updated.iter_mut().filter(|d| matches_filter(d, filter)) {
            for (field, value) in changes {
                document.insert(field.clone(), value.clone());
            }
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }
        let conflict = updated
            .iter()
            .enumerate()
            .find_map(|(position, document)| self.unique_conflict(document, updated[..position].iter()))
            .map(str::to_string);
        if let Some(index) = conflict {
            return Err(constraint(name, &index));
        }
        self.documents = updated;
        Ok(count)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    collections: BTreeMap<String, Collection>,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: DashMap<String, Collection>,
    snapshot_path: Option<PathBuf>,
    /// Held from snapshot capture through rename
    snapshot_writer: Mutex<()>,
}

impl DocumentStore {
    /// In-memory store with no snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a JSON snapshot at `path`, loading it if present
    pub async fn open(path: &Path) -> GateResult<Self> {
        let collections = DashMap::new();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| AdapterError::ConnectionFailed {
                    target: path.display().to_string(),
                    message: format!("Invalid snapshot: {}", e),
                })?;
                for (name, collection) in snapshot.collections {
                    collections.insert(name, collection);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AdapterError::ConnectionFailed {
                    target: path.display().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        }
        Ok(Self {
            collections,
            snapshot_path: Some(path.to_path_buf()),
            snapshot_writer: Mutex::new(()),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Write the snapshot, if the store has one. The file is replaced atomically
    /// and concurrent callers land on disk in the order they captured.
    pub async fn persist(&self) -> GateResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let _writer = self.snapshot_writer.lock().await;
        let snapshot = Snapshot {
            collections: self
                .collections
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let failed = |e: std::io::Error| AdapterError::query_failed(path.display().to_string(), e);
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AdapterError::query_failed(path.display().to_string(), e))?;
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, bytes).await.map_err(failed)?;
        tokio::fs::rename(&staging, path).await.map_err(failed)?;
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns false when the collection already existed
    pub fn create_collection(&self, name: &str) -> bool {
        if self.collections.contains_key(name) {
            return false;
        }
        self.collections.entry(name.to_string()).or_default();
        true
    }

    /// Add an index unless one with the same name exists. A new unique index
    /// must hold for the documents already stored.
    pub fn create_index(&self, collection: &str, index: CollectionIndex) -> GateResult<()> {
        let mut entry = self.collection_mut(collection)?;
        if entry.indexes.iter().any(|i| i.name == index.name) {
            return Ok(());
        }
        entry.indexes.push(index);
        let conflict = {
            let current: &Collection = &entry;
            current
                .documents
                .iter()
                .enumerate()
                .find_map(|(position, document)| {
                    current.unique_conflict(document, current.documents[..position].iter())
                })
                .map(str::to_string)
        };
        if let Some(name) = conflict {
            entry.indexes.pop();
            return Err(constraint(collection, &name));
        }
        Ok(())
    }

    pub fn indexes(&self, collection: &str) -> Vec<CollectionIndex> {
        self.collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn insert(&self, collection: &str, document: Document) -> GateResult<()> {
        let mut entry = self.collection_mut(collection)?;
        if let Some(name) = entry.unique_conflict(&document, entry.documents.iter()) {
            return Err(constraint(collection, name));
        }
        entry.documents.push(document);
        Ok(())
    }

    /// Documents equal to `filter` on every filter field; a null filter value
    /// matches a missing or null field
    pub fn find(&self, collection: &str, filter: &Document) -> GateResult<Vec<Document>> {
        let entry = self
            .collections
            .get(collection)
            .ok_or_else(|| AdapterError::unknown_structure(collection))?;
        Ok(entry
            .documents
            .iter()
            .filter(|d| matches_filter(d, filter))
            .cloned()
            .collect())
    }

    pub fn update(&self, collection: &str, filter: &Document, changes: &Document) -> GateResult<u64> {
        self.collection_mut(collection)?.update_matching(collection, filter, changes)
    }

    /// Insert `document` when nothing matches `filter`, otherwise apply `changes`
    /// to the matches. Lookup and write happen under one collection lock.
    /// `before_insert` runs only on the insert path.
    pub fn upsert<F>(
        &self,
        collection: &str,
        filter: &Document,
        document: Document,
        changes: &Document,
        before_insert: F,
    ) -> GateResult<u64>
    where
        F: FnOnce(&Document) -> GateResult<()>,
    {
        let mut entry = self.collection_mut(collection)?;
        if !entry.documents.iter().any(|d| matches_filter(d, filter)) {
            before_insert(&document)?;
            if let Some(name) = entry.unique_conflict(&document, entry.documents.iter()) {
                return Err(constraint(collection, name));
            }
            entry.documents.push(document);
            return Ok(1);
        }
        if changes.is_empty() {
            return Ok(0);
        }
        entry.update_matching(collection, filter, changes)
    }

    pub fn delete(&self, collection: &str, filter: &Document) -> GateResult<u64> {
        let mut entry = self.collection_mut(collection)?;
        let before = entry.documents.len();
        entry.documents.retain(|d| !matches_filter(d, filter));
        Ok((before - entry.documents.len()) as u64)
    }

    /// Next value of the named counter, starting at 1
    pub fn next_sequence(&self, counter: &str) -> GateResult<i64> {
        let mut entry = self.collection_mut(COUNTERS_COLLECTION)?;
        if let Some(document) = entry
            .documents
            .iter_mut()
            .find(|d| d.get("name").and_then(Value::as_str) == Some(counter))
        {
            let next = document.get("seq").and_then(Value::as_i64).unwrap_or(0) + 1;
            document.insert("seq".to_string(), json!(next));
            return Ok(next);
        }
        let mut document = Document::new();
        document.insert("name".to_string(), json!(counter));
        document.insert("seq".to_string(), json!(1));
        entry.documents.push(document);
        Ok(1)
    }

    fn collection_mut(&self, name: &str) -> GateResult<dashmap::mapref::one::RefMut<'_, String, Collection>> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| AdapterError::unknown_structure(name).into())
    }
}

fn constraint(collection: &str, index: &str) -> crate::utils::error::GateError {
    AdapterError::ConstraintViolation {
        target: collection.to_string(),
        message: format!("duplicate key violates unique index '{}'", index),
    }
    .into()
}

pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| match document.get(field) {
        None => expected.is_null(),
        Some(actual) => actual == expected,
    })
}

/// Total order used for sorting: nulls first, then numbers, strings and booleans
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
