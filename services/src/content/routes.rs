//! Generic CRUD handlers shared by every content collection.

use axum::{
    Router,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::AppState;
use crate::documents::lookup::find_by_names;
use crate::documents::populate::expand;
use crate::documents::query::{CREATED_AT, ID_FIELD, UPDATED_AT};
use crate::documents::schema::WriteMode;
use crate::documents::{Collection, DocumentStore, Filter, FindQuery};
use crate::listing::{ListOptions, ListQuery, list, parse_populate};
use crate::mail::Mailer;
use crate::response::{ApiError, ApiResponse, FieldError, JsonBody};
use crate::users::{RequireAdmin, UserStorage};

#[derive(Debug, Default, Deserialize)]
pub struct PopulateQuery {
    pub populate: Option<String>,
}

/// Names to look verses up by; each one supplied narrows the result.
#[derive(Debug, Default, Deserialize)]
pub struct VerseLookupQuery {
    pub language: Option<String>,
    pub version: Option<String>,
    pub book: Option<String>,
    pub chapter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCount {
    pub deleted_count: u64,
}

/// Nests [`collection_routes`] for every known collection under its slug.
pub fn content_routes<D, U, M>() -> Router<AppState<D, U, M>>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    Collection::ALL
        .into_iter()
        .fold(Router::new(), |router, collection| {
            router.nest(
                &format!("/{}", collection.slug()),
                collection_routes::<D, U, M>(collection),
            )
        })
}

/// Creates the CRUD router for one collection.
///
/// # Type Parameters
///
/// * `D` - Document store implementation
/// * `U` - Account storage implementation
/// * `M` - Mail transport implementation
pub fn collection_routes<D, U, M>(collection: Collection) -> Router<AppState<D, U, M>>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let router = Router::new()
        .route("/all", get(list_documents::<D, U, M>))
        .route("/create", post(create_document::<D, U, M>))
        .route("/update/{id}", put(update_document::<D, U, M>))
        .route("/delete/{id}", delete(delete_document::<D, U, M>))
        .route("/delete-all", delete(delete_all_documents::<D, U, M>));

    let router = if collection.has_root_routes() {
        router
            .route(
                "/",
                get(list_documents::<D, U, M>)
                    .post(create_document::<D, U, M>)
                    .delete(delete_all_documents::<D, U, M>),
            )
            .route(
                "/{id}",
                get(get_document::<D, U, M>)
                    .put(update_document::<D, U, M>)
                    .delete(delete_document::<D, U, M>),
            )
    } else {
        router.route("/{id}", get(get_document::<D, U, M>))
    };

    let router = if collection == Collection::Verse {
        router.route("/query", get(query_verses::<D, U, M>))
    } else {
        router
    };

    router.layer(Extension(collection))
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest("Invalid ID format".to_owned()))
}

/// Resolves a path key to a document id. Collections with a code field also
/// accept the code; an unknown code is a 404.
async fn locate<D: DocumentStore>(
    store: &D,
    collection: Collection,
    key: &str,
) -> Result<Uuid, ApiError> {
    let Some(code_field) = collection.code_field() else {
        return parse_id(key);
    };
    if let Ok(id) = Uuid::parse_str(key) {
        return Ok(id);
    }

    let query = FindQuery::new(Filter::new().equals(code_field, key)).window(0, 1);
    store
        .find(collection, &query)
        .await?
        .first()
        .map(|doc| doc.id)
        .ok_or_else(|| ApiError::NotFound(format!("{} not found", collection.label())))
}

/// Takes the body as an object and drops the server-managed fields.
fn writable_body(body: Value) -> Result<Map<String, Value>, ApiError> {
    let Value::Object(mut body) = body else {
        return Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_owned(),
        ));
    };
    for reserved in [ID_FIELD, CREATED_AT, UPDATED_AT] {
        body.remove(reserved);
    }
    Ok(body)
}

/// GET /all
#[tracing::instrument(skip_all, fields(collection = %collection))]
async fn list_documents<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    Query(raw): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let options = ListOptions::parse(collection, &raw)?;
    let page = list(&state.documents, collection, &options).await?;

    Ok(ApiResponse::ok(
        format!("{} list retrieved successfully", collection.label()),
        page,
    ))
}

/// GET /{id}
///
/// Languages and versions may also be fetched by code.
#[tracing::instrument(skip_all, fields(collection = %collection, id = %id))]
async fn get_document<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    Path(id): Path<String>,
    Query(raw): Query<PopulateQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = locate(&state.documents, collection, &id).await?;
    let relations = parse_populate(collection, raw.populate.as_deref())?;
    let not_found = || ApiError::NotFound(format!("{} not found", collection.label()));

    let doc = state
        .documents
        .get(collection, id)
        .await?
        .ok_or_else(not_found)?;
    let rendered = expand(&state.documents, std::slice::from_ref(&doc), &relations)
        .await?
        .pop()
        .ok_or_else(not_found)?;

    Ok(ApiResponse::ok(
        format!("{} retrieved successfully", collection.label()),
        rendered,
    ))
}

/// POST /create
#[tracing::instrument(skip_all, fields(collection = %collection))]
async fn create_document<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    _admin: RequireAdmin,
    JsonBody(body): JsonBody<Value>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let mut body = writable_body(body)?;
    let errors = collection.validate(&body, WriteMode::Create);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }
    collection.apply_defaults(&mut body);

    let doc = state.documents.insert(collection, body).await?;
    tracing::info!(id = %doc.id, "Created document");

    Ok(ApiResponse::created(
        format!("{} created successfully", collection.label()),
        doc.to_value(),
    ))
}

/// PUT /update/{id}
///
/// Only the supplied fields are validated and merged.
#[tracing::instrument(skip_all, fields(collection = %collection, id = %id))]
async fn update_document<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Value>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = locate(&state.documents, collection, &id).await?;
    let patch = writable_body(body)?;
    let errors = collection.validate(&patch, WriteMode::Update);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let doc = state
        .documents
        .update(collection, id, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} not found", collection.label())))?;

    Ok(ApiResponse::ok(
        format!("{} updated successfully", collection.label()),
        doc.to_value(),
    ))
}

/// DELETE /delete/{id}
#[tracing::instrument(skip_all, fields(collection = %collection, id = %id))]
async fn delete_document<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let id = locate(&state.documents, collection, &id).await?;
    if !state.documents.delete(collection, id).await? {
        return Err(ApiError::NotFound(format!(
            "{} not found",
            collection.label()
        )));
    }
    tracing::info!("Deleted document");

    Ok(ApiResponse::ok(
        format!("{} deleted successfully", collection.label()),
        json!({ "id": id }),
    ))
}

/// DELETE /delete-all
#[tracing::instrument(skip_all, fields(collection = %collection))]
async fn delete_all_documents<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Extension(collection): Extension<Collection>,
    _admin: RequireAdmin,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let deleted_count = state.documents.delete_all(collection).await?;
    tracing::warn!(deleted_count, "Deleted every document");

    Ok(ApiResponse::ok(
        format!("All {} documents deleted successfully", collection.slug()),
        DeletedCount { deleted_count },
    ))
}

/// GET /query (verses only)
///
/// Verses by the names of their language, version, book and chapter.
#[tracing::instrument(skip_all)]
async fn query_verses<D, U, M>(
    State(state): State<AppState<D, U, M>>,
    Query(raw): Query<VerseLookupQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    D: DocumentStore,
    U: UserStorage,
    M: Mailer,
{
    let names: Vec<(&str, &str)> = [
        ("language", raw.language.as_deref()),
        ("version", raw.version.as_deref()),
        ("book", raw.book.as_deref()),
        ("chapter", raw.chapter.as_deref()),
    ]
    .into_iter()
    .filter_map(|(field, name)| {
        name.map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| (field, name))
    })
    .collect();
    if names.is_empty() {
        return Err(ApiError::validation(vec![FieldError::new(
            "query",
            "language, version, book or chapter is required",
        )]));
    }

    let verse = find_by_names(&state.documents, Collection::Verse, &names).await?;
    tracing::debug!(found = verse.len(), "Looked up verses by name");

    Ok(ApiResponse::ok(
        "Verse text retrieved successfully",
        json!({ "verse": verse }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MockDocumentStore;

    #[test]
    fn writable_body_drops_server_fields() {
        let body = writable_body(json!({
            "id": "x",
            "created_at": "then",
            "updated_at": "now",
            "language": "English",
        }))
        .unwrap();
        assert_eq!(Value::Object(body), json!({ "language": "English" }));
    }

    #[test]
    fn writable_body_rejects_non_objects() {
        let err = writable_body(json!(["a"])).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[tokio::test]
    async fn locate_accepts_codes_only_where_defined() {
        let store = MockDocumentStore::new();
        let english = store
            .insert(
                Collection::Language,
                json!({ "language_code": "en" }).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        let found = locate(&store, Collection::Language, "en").await.unwrap();
        assert_eq!(found, english.id);
        let found = locate(&store, Collection::Language, &english.id.to_string())
            .await
            .unwrap();
        assert_eq!(found, english.id);

        let err = locate(&store, Collection::Language, "fr").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        let err = locate(&store, Collection::Tag, "en").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
