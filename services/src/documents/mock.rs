//! In-memory [`DocumentStore`] for tests.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::query::{CREATED_AT, Condition, Filter, FindQuery, SortDirection};
use super::{Collection, Document, DocumentStore, StorageError};

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    // Insertion sequence breaks ties between equal sort keys.
    docs: HashMap<Uuid, (u64, Document)>,
}

/// Thread-safe in-memory store.
///
/// Clones share the same contents. [`MockDocumentStore::set_failing`] makes
/// every call return [`StorageError::Backend`], which lets tests exercise the
/// error paths of handlers.
#[derive(Clone, Default)]
pub struct MockDocumentStore {
    inner: Arc<RwLock<Inner>>,
    failing: Arc<AtomicBool>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails.
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, AtomicOrdering::SeqCst);
    }

    /// Inserts a document with an explicit creation time.
    pub fn insert_at(
        &self,
        collection: Collection,
        body: Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            collection,
            body,
            created_at,
            updated_at: created_at,
        };
        let mut inner = self.inner.write().expect("lock poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.docs.insert(document.id, (seq, document.clone()));
        document
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.inner
            .read()
            .expect("lock poisoned")
            .docs
            .values()
            .filter(|(_, doc)| doc.collection == collection)
            .count()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::Backend("mock store is failing".to_owned()));
        }
        Ok(())
    }

    fn matching(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<(u64, Document)>, StorageError> {
        let conditions = filter
            .conditions()
            .iter()
            .map(Predicate::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner
            .docs
            .values()
            .filter(|(_, doc)| doc.collection == collection)
            .filter(|(_, doc)| conditions.iter().all(|predicate| predicate.test(doc)))
            .cloned()
            .collect())
    }
}

enum Predicate<'a> {
    Equals(&'a str, &'a Value),
    OneOf(&'a str, &'a [Value]),
    Matches(&'a str, regex::Regex),
}

impl<'a> Predicate<'a> {
    fn compile(condition: &'a Condition) -> Result<Self, StorageError> {
        Ok(match condition {
            Condition::Equals { field, value } => Self::Equals(field, value),
            Condition::OneOf { field, values } => Self::OneOf(field, values),
            Condition::Matches { field, pattern } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| StorageError::InvalidPattern(e.to_string()))?;
                Self::Matches(field, regex)
            }
        })
    }

    fn test(&self, doc: &Document) -> bool {
        match self {
            Self::Equals(field, value) => doc.field(field).as_ref() == Some(*value),
            Self::OneOf(field, values) => doc
                .field(field)
                .is_some_and(|value| values.contains(&value)),
            Self::Matches(field, regex) => doc
                .field(field)
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text)),
        }
    }
}

/// Orders JSON values by type first (missing and null lowest), then by value.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_documents(field: &str, a: &(u64, Document), b: &(u64, Document)) -> Ordering {
    let by_field = if field == CREATED_AT {
        a.1.created_at.cmp(&b.1.created_at)
    } else {
        compare_values(a.1.field(field).as_ref(), b.1.field(field).as_ref())
    };
    by_field.then(a.0.cmp(&b.0))
}

impl DocumentStore for MockDocumentStore {
    async fn is_connected(&self) -> bool {
        !self.failing.load(AtomicOrdering::SeqCst)
    }

    async fn find(
        &self,
        collection: Collection,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StorageError> {
        self.check()?;
        let mut docs = self.matching(collection, &query.filter)?;

        let field = query.sort.field.as_str();
        match query.sort.direction {
            SortDirection::Ascending => docs.sort_by(|a, b| compare_documents(field, a, b)),
            SortDirection::Descending => docs.sort_by(|a, b| compare_documents(field, b, a)),
        }

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let take = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(docs
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StorageError> {
        self.check()?;
        Ok(self.matching(collection, filter)?.len() as u64)
    }

    async fn find_by_ids(
        &self,
        collection: Collection,
        ids: &[Uuid],
    ) -> Result<Vec<Document>, StorageError> {
        self.check()?;
        let inner = self.inner.read().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| inner.docs.get(id))
            .filter(|(_, doc)| doc.collection == collection)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>, StorageError> {
        self.check()?;
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner
            .docs
            .get(&id)
            .filter(|(_, doc)| doc.collection == collection)
            .map(|(_, doc)| doc.clone()))
    }

    async fn insert(
        &self,
        collection: Collection,
        body: Map<String, Value>,
    ) -> Result<Document, StorageError> {
        self.check()?;
        Ok(self.insert_at(collection, body, Utc::now()))
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> Result<Option<Document>, StorageError> {
        self.check()?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let Some((_, doc)) = inner
            .docs
            .get_mut(&id)
            .filter(|(_, doc)| doc.collection == collection)
        else {
            return Ok(None);
        };
        doc.body.extend(patch);
        doc.updated_at = Utc::now();
        Ok(Some(doc.clone()))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<bool, StorageError> {
        self.check()?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let owned = inner
            .docs
            .get(&id)
            .is_some_and(|(_, doc)| doc.collection == collection);
        if owned {
            inner.docs.remove(&id);
        }
        Ok(owned)
    }

    async fn delete_all(&self, collection: Collection) -> Result<u64, StorageError> {
        self.check()?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let before = inner.docs.len();
        inner.docs.retain(|_, (_, doc)| doc.collection != collection);
        Ok((before - inner.docs.len()) as u64)
    }
}
