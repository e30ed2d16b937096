//! Finding documents by the names of the documents they reference.

use serde_json::Value;

use super::populate::expand;
use super::query::CREATED_AT;
use super::{Collection, DocumentStore, Filter, FindQuery, Sort, StorageError};

/// Finds documents of `collection` whose relations point at documents carrying
/// the given names, e.g. verses by language, version, book and chapter name.
///
/// `names` pairs a relation field with the name its target must carry (see
/// [`Collection::name_field`]). Every pair narrows the result. A field that is
/// not a named relation, or a name no target carries, yields nothing. Results
/// come oldest first with every relation expanded.
#[tracing::instrument(skip(store))]
pub async fn find_by_names<D: DocumentStore>(
    store: &D,
    collection: Collection,
    names: &[(&str, &str)],
) -> Result<Vec<Value>, StorageError> {
    let mut filter = Filter::new();

    for (field, name) in names {
        let Some(relation) = collection.relation(field) else {
            return Ok(Vec::new());
        };
        let Some(name_field) = relation.target.name_field() else {
            return Ok(Vec::new());
        };

        let targets = store
            .find(
                relation.target,
                &FindQuery::new(Filter::new().equals(name_field, *name)),
            )
            .await?;
        if targets.is_empty() {
            tracing::debug!(field = *field, "no referenced document carries the name");
            return Ok(Vec::new());
        }

        let ids = targets
            .iter()
            .map(|doc| Value::String(doc.id.to_string()))
            .collect();
        filter = filter.one_of(*field, ids);
    }

    let docs = store
        .find(
            collection,
            &FindQuery::new(filter).sorted(Sort::ascending(CREATED_AT)),
        )
        .await?;
    expand(store, &docs, collection.relations()).await
}
