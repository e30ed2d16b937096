//! Relation expansion: replaces stored ids with the documents they point to.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::schema::Relation;
use super::{Document, DocumentStore, StorageError};

/// Renders `docs` as JSON with every listed relation expanded.
///
/// Each relation costs one `find_by_ids` round trip regardless of the number
/// of documents. A single reference whose target no longer exists becomes
/// `null`; dangling ids inside an array are dropped. Values that are not ids
/// at all are left untouched.
pub async fn expand<D: DocumentStore>(
    store: &D,
    docs: &[Document],
    relations: &[Relation],
) -> Result<Vec<Value>, StorageError> {
    let mut rendered: Vec<Value> = docs.iter().map(Document::to_value).collect();

    for relation in relations {
        let ids = referenced_ids(&rendered, relation);
        if ids.is_empty() {
            continue;
        }

        let targets: HashMap<Uuid, Value> = store
            .find_by_ids(relation.target, &ids)
            .await?
            .iter()
            .map(|doc| (doc.id, doc.to_value()))
            .collect();

        for doc in &mut rendered {
            let Some(slot) = doc.get_mut(relation.field) else {
                continue;
            };
            replace(slot, relation.many, &targets);
        }
    }

    Ok(rendered)
}

fn parse_id(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|raw| Uuid::parse_str(raw).ok())
}

fn referenced_ids(rendered: &[Value], relation: &Relation) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = rendered
        .iter()
        .filter_map(|doc| doc.get(relation.field))
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().filter_map(parse_id).collect::<Vec<_>>(),
            single => parse_id(single).into_iter().collect(),
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn replace(slot: &mut Value, many: bool, targets: &HashMap<Uuid, Value>) {
    match slot {
        Value::Array(items) if many => {
            items.retain(|item| parse_id(item).is_none_or(|id| targets.contains_key(&id)));
            for item in items.iter_mut() {
                if let Some(target) = parse_id(item).and_then(|id| targets.get(&id)) {
                    *item = target.clone();
                }
            }
        }
        single => {
            if let Some(id) = parse_id(single) {
                *single = targets.get(&id).cloned().unwrap_or(Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{Collection, MockDocumentStore};
    use serde_json::json;

    fn body(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn expands_single_references() {
        let store = MockDocumentStore::new();
        let language = store
            .insert(
                Collection::Language,
                body(json!({ "language_code": "en", "language_name": "English" })),
            )
            .await
            .unwrap();
        let version = store
            .insert(
                Collection::Version,
                body(json!({ "language": language.id.to_string(), "version_code": "KJV" })),
            )
            .await
            .unwrap();

        let rendered = expand(
            &store,
            &[version],
            Collection::Version.relations(),
        )
        .await
        .unwrap();

        assert_eq!(rendered[0]["language"]["language_code"], "en");
        assert_eq!(rendered[0]["version_code"], "KJV");
    }

    #[tokio::test]
    async fn expands_arrays_and_drops_dangling_ids() {
        let store = MockDocumentStore::new();
        let tag = store
            .insert(Collection::Tag, body(json!({ "word": "love" })))
            .await
            .unwrap();
        let dangling = Uuid::new_v4();
        let example = store
            .insert(
                Collection::Example,
                body(json!({ "tags": [tag.id.to_string(), dangling.to_string()] })),
            )
            .await
            .unwrap();

        let rendered = expand(&store, &[example], Collection::Example.relations())
            .await
            .unwrap();

        let tags = rendered[0]["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["word"], "love");
    }

    #[tokio::test]
    async fn missing_single_reference_becomes_null() {
        let store = MockDocumentStore::new();
        let book = store
            .insert(
                Collection::Book,
                body(json!({ "language": Uuid::new_v4().to_string(), "book_name": "Ruth" })),
            )
            .await
            .unwrap();

        let rendered = expand(&store, &[book], &Collection::Book.relations()[..1])
            .await
            .unwrap();
        assert!(rendered[0]["language"].is_null());
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let store = MockDocumentStore::new();
        let version = store
            .insert(
                Collection::Version,
                body(json!({ "language": Uuid::new_v4().to_string() })),
            )
            .await
            .unwrap();
        store.set_failing(true);

        let result = expand(&store, &[version], Collection::Version.relations()).await;
        assert!(result.is_err());
    }
}
