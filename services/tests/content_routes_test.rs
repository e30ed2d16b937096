mod common;

use axum::http::StatusCode;
use common::{TestApp, spawn_app};
use manna_services::documents::Collection;
use manna_services::users::Realm;
use serde_json::{Value, json};
use uuid::Uuid;

fn language_body() -> Value {
    json!({
        "language_code": "en",
        "language_name": "English",
        "english_name": "English",
    })
}

#[tokio::test]
async fn test_create_applies_defaults() {
    let app = spawn_app();
    let token = app.admin_token();

    let response = app
        .server
        .post("/api/language/create")
        .authorization_bearer(&token)
        .json(&language_body())
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["data"]["language_code"], "en");
    assert_eq!(body["data"]["status"], "1");
    assert_eq!(body["data"]["popular"], "0");
    assert!(Uuid::parse_str(body["data"]["id"].as_str().unwrap()).is_ok());
    assert_eq!(app.documents.len(Collection::Language), 1);
}

#[tokio::test]
async fn test_writes_require_admin_token() {
    let app = spawn_app();

    app.server
        .post("/api/language/create")
        .json(&language_body())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let user = app.seed_account(Realm::User, "reader@example.com");
    app.server
        .post("/api/language/create")
        .authorization_bearer(app.token_for(&user, Realm::User))
        .json(&language_body())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    assert_eq!(app.documents.len(Collection::Language), 0);
}

#[tokio::test]
async fn test_create_rejects_invalid_bodies() {
    let app = spawn_app();
    let token = app.admin_token();

    let response = app
        .server
        .post("/api/version/create")
        .authorization_bearer(&token)
        .json(&json!({
            "language": "not-an-id",
            "version_code": "KJV",
            "english_name": "King James",
            "volume_name": "KJV",
            "collection_code": "XX",
            "media": "Text",
            "media_type": "Drama",
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json();
    let mut fields: Vec<&str> = body["data"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    fields.sort_unstable();
    assert_eq!(fields, ["collection_code", "language"]);

    app.server
        .post("/api/language/create")
        .authorization_bearer(&token)
        .json(&json!(["not", "an", "object"]))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_update_delete_cycle() {
    let app = spawn_app();
    let token = app.admin_token();

    let created: Value = app
        .server
        .post("/api/tag/create")
        .authorization_bearer(&token)
        .json(&json!({ "name": "grace" }))
        .await
        .json();
    let id = created["data"]["id"].as_str().unwrap().to_owned();

    let response = app.server.get(&format!("/api/tag/{id}")).await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["name"], "grace");

    let response = app
        .server
        .put(&format!("/api/tag/update/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "name": "mercy", "id": "ignored" }))
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["data"]["name"], "mercy");
    assert_eq!(body["data"]["id"], id.as_str());

    app.server
        .delete(&format!("/api/tag/delete/{id}"))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::OK);

    app.server
        .get(&format!("/api/tag/{id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .delete(&format!("/api/tag/delete/{id}"))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_and_unknown_ids() {
    let app = spawn_app();
    let token = app.admin_token();

    app.server
        .get("/api/verse/not-a-uuid")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .put(&format!("/api/verse/update/{}", Uuid::new_v4()))
        .authorization_bearer(&token)
        .json(&json!({ "verse_text": "changed" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_all_reports_count() {
    let app = spawn_app();
    let token = app.admin_token();

    for name in ["a", "b", "c"] {
        app.server
            .post("/api/qa-category/create")
            .authorization_bearer(&token)
            .json(&json!({ "name": name }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let response = app
        .server
        .delete("/api/qa-category/delete-all")
        .authorization_bearer(&token)
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["deletedCount"], 3);
    assert_eq!(app.documents.len(Collection::QaCategory), 0);
}

#[tokio::test]
async fn test_single_document_populate() {
    let app = spawn_app();
    let token = app.admin_token();

    let tag: Value = app
        .server
        .post("/api/tag/create")
        .authorization_bearer(&token)
        .json(&json!({ "name": "hope" }))
        .await
        .json();
    let tag_id = tag["data"]["id"].as_str().unwrap().to_owned();

    let example: Value = app
        .server
        .post("/api/example/create")
        .authorization_bearer(&token)
        .json(&json!({ "tags": [tag_id, Uuid::new_v4().to_string()] }))
        .await
        .json();
    let example_id = example["data"]["id"].as_str().unwrap().to_owned();

    let response = app
        .server
        .get(&format!("/api/example/{example_id}"))
        .add_query_param("populate", "tags")
        .await;
    response.assert_status(StatusCode::OK);

    let body: Value = response.json();
    let tags = body["data"]["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0]["name"], "hope");
}

#[tokio::test]
async fn test_language_by_code() {
    let app = spawn_app();
    let token = app.admin_token();

    app.server
        .post("/api/language/create")
        .authorization_bearer(&token)
        .json(&language_body())
        .await
        .assert_status(StatusCode::CREATED);

    let response = app.server.get("/api/language/en").await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["language_name"], "English");

    let response = app
        .server
        .put("/api/language/update/en")
        .authorization_bearer(&token)
        .json(&json!({ "popular": "1" }))
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["popular"], "1");

    app.server
        .delete("/api/language/delete/en")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .delete("/api/language/delete/en")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::OK);

    app.server
        .get("/api/language/en")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    assert_eq!(app.documents.len(Collection::Language), 0);
}

#[tokio::test]
async fn test_version_by_code() {
    let app = spawn_app();
    let token = app.admin_token();

    let language: Value = app
        .server
        .post("/api/language/create")
        .authorization_bearer(&token)
        .json(&language_body())
        .await
        .json();
    app.server
        .post("/api/version/create")
        .authorization_bearer(&token)
        .json(&json!({
            "language": language["data"]["id"],
            "version_code": "KJV",
            "english_name": "King James",
            "volume_name": "KJV",
            "collection_code": "Both",
            "media": "Text",
            "media_type": "N/A",
        }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .server
        .get("/api/version/KJV")
        .add_query_param("populate", "language")
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(
        response.json::<Value>()["data"]["language"]["language_code"],
        "en"
    );

    app.server
        .get("/api/version/NIV")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prayer_root_routes() {
    let app = spawn_app();
    let token = app.admin_token();

    for email in ["one@example.com", "two@example.com"] {
        app.server
            .post("/api/prayer")
            .authorization_bearer(&token)
            .json(&json!({ "email": email, "title": "Healing" }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let response = app.server.get("/api/prayer").await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);

    let id = items[0]["id"].as_str().unwrap().to_owned();
    app.server
        .put(&format!("/api/prayer/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "title": "Thanksgiving" }))
        .await
        .assert_status(StatusCode::OK);
    app.server
        .delete(&format!("/api/prayer/{id}"))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::OK);

    let response = app
        .server
        .delete("/api/prayer")
        .authorization_bearer(&token)
        .await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["deletedCount"], 1);
}

#[tokio::test]
async fn test_daily_manna_root_writes_need_admin() {
    let app = spawn_app();

    app.server
        .post("/api/daily-manna")
        .json(&json!({ "title": "Bread", "description": "Daily", "date": "2026-01-01" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .delete("/api/daily-manna")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Root routes are limited to prayers and daily manna.
    app.server
        .post("/api/tag")
        .authorization_bearer(app.admin_token())
        .json(&json!({ "name": "grace" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

/// Creates a document as admin and returns its id.
async fn create(app: &TestApp, token: &str, slug: &str, body: Value) -> String {
    let response = app
        .server
        .post(&format!("/api/{slug}/create"))
        .authorization_bearer(token)
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["data"]["id"]
        .as_str()
        .unwrap()
        .to_owned()
}

#[tokio::test]
async fn test_verse_query_by_names() {
    let app = spawn_app();
    let token = app.admin_token();

    let language = create(&app, &token, "language", language_body()).await;
    let version = create(
        &app,
        &token,
        "version",
        json!({
            "language": language,
            "version_code": "KJV",
            "english_name": "King James",
            "volume_name": "King James Version",
            "collection_code": "Both",
            "media": "Text",
            "media_type": "N/A",
        }),
    )
    .await;
    let book = create(
        &app,
        &token,
        "book",
        json!({
            "language": language,
            "version": version,
            "collection_code": "OT",
            "book_id": "GEN",
            "book_name": "Genesis",
        }),
    )
    .await;
    let chapter = create(
        &app,
        &token,
        "chapter",
        json!({
            "language": language,
            "version": version,
            "book": book,
            "chapter_id": "GEN.1",
            "chapter_name": "1",
        }),
    )
    .await;
    create(
        &app,
        &token,
        "verse",
        json!({
            "language": language,
            "version": version,
            "book": book,
            "chapter": chapter,
            "verse_id": "GEN.1.1",
            "verse_text": "In the beginning God created the heaven and the earth.",
        }),
    )
    .await;

    let response = app
        .server
        .get("/api/verse/query")
        .add_query_param("language", "English")
        .add_query_param("version", "King James Version")
        .add_query_param("book", "Genesis")
        .add_query_param("chapter", "1")
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["message"], "Verse text retrieved successfully");
    let verses = body["data"]["verse"].as_array().unwrap();
    assert_eq!(verses.len(), 1);
    assert_eq!(verses[0]["verse_id"], "GEN.1.1");
    assert_eq!(verses[0]["chapter"]["chapter_name"], "1");

    let response = app
        .server
        .get("/api/verse/query")
        .add_query_param("book", "Exodus")
        .await;
    response.assert_status(StatusCode::OK);
    assert!(response.json::<Value>()["data"]["verse"].as_array().unwrap().is_empty());

    app.server
        .get("/api/verse/query")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}
