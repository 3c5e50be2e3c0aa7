mod common;

use axum::http::StatusCode;
use common::{test_config, TestApp};
use serde_json::json;

#[tokio::test]
async fn creator_becomes_author_contributor() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;

    let created = app
        .post(
            "/api/projects",
            &alice,
            json!({ "title": "Tracker", "description": "Bug tracker", "type": "IOS" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["type"], "IOS");
    assert_eq!(created.body["author"]["username"], "alice");

    let project_id = created.body["id"].as_str().unwrap();
    let members = app
        .get(&format!("/api/contributors?project={project_id}"), &alice)
        .await;
    assert_eq!(members.status, StatusCode::OK);
    assert_eq!(members.body["count"], 1);
    assert_eq!(members.body["results"][0]["user"]["id"], alice.id.as_str());
    assert_eq!(members.body["results"][0]["role"], "AUTHOR");
}

#[tokio::test]
async fn project_list_only_shows_own_projects() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;
    app.create_project(&alice, "Alpha").await;
    app.create_project(&bob, "Beta").await;

    let listed = app.get("/api/projects", &alice).await;

    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body["count"], 1);
    assert_eq!(listed.body["results"][0]["title"], "Alpha");
    assert_eq!(listed.body["next"], json!(null));
    assert_eq!(listed.body["previous"], json!(null));
}

#[tokio::test]
async fn outsiders_cannot_read_a_project() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;
    let mallory = app.signup("mallory").await;
    let project_id = app.create_project(&alice, "Alpha").await;

    let response = app.get(&format!("/api/projects/{project_id}"), &mallory).await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(
        response.body["error"],
        "You must be a contributor to this project."
    );
}

#[tokio::test]
async fn only_the_author_changes_or_deletes_a_project() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;
    let project_id = app.create_project(&alice, "Alpha").await;
    app.add_contributor(&alice, &project_id, &bob).await;
    let uri = format!("/api/projects/{project_id}");

    let read = app.get(&uri, &bob).await;
    assert_eq!(read.status, StatusCode::OK);

    let patched = app.patch(&uri, &bob, json!({ "title": "Hijacked" })).await;
    assert_eq!(patched.status, StatusCode::FORBIDDEN);

    let deleted = app.delete(&uri, &bob).await;
    assert_eq!(deleted.status, StatusCode::FORBIDDEN);

    let own = app.patch(&uri, &alice, json!({ "title": "Alpha v2" })).await;
    assert_eq!(own.status, StatusCode::OK);
    assert_eq!(own.body["title"], "Alpha v2");
    assert_eq!(own.body["description"], "Issue tracker");
    assert_eq!(own.body["type"], "BACKEND");
}

#[tokio::test]
async fn full_update_needs_every_field() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;
    let project_id = app.create_project(&alice, "Alpha").await;
    let uri = format!("/api/projects/{project_id}");

    let partial = app.put(&uri, &alice, json!({ "title": "Alpha v2" })).await;
    assert_eq!(partial.status, StatusCode::BAD_REQUEST);
    assert_eq!(partial.body["fields"]["description"], json!(["This field is required."]));
    assert_eq!(partial.body["fields"]["type"], json!(["This field is required."]));

    let replaced = app
        .put(
            &uri,
            &alice,
            json!({ "title": "Alpha v2", "description": "Rewritten", "type": "ANDROID" }),
        )
        .await;
    assert_eq!(replaced.status, StatusCode::OK);
    assert_eq!(replaced.body["type"], "ANDROID");
}

#[tokio::test]
async fn unknown_project_type_is_rejected() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;

    let response = app
        .post(
            "/api/projects",
            &alice,
            json!({ "title": "Alpha", "description": "x", "type": "WEB" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.body["fields"]["type"],
        json!(["\"WEB\" is not a valid choice."])
    );
    assert_eq!(app.count_rows("projects").await, 0);
}

#[tokio::test]
async fn deleting_a_project_cascades() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;
    let project_id = app.create_project(&alice, "Alpha").await;
    app.add_contributor(&alice, &project_id, &bob).await;
    let issue_id = app.create_issue(&bob, &project_id).await;
    app.create_comment(&alice, &issue_id).await;

    let response = app.delete(&format!("/api/projects/{project_id}"), &alice).await;

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    for table in ["projects", "contributors", "issues", "comments"] {
        assert_eq!(app.count_rows(table).await, 0, "{table}");
    }

    let gone = app.get(&format!("/api/issues/{issue_id}"), &bob).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let app = TestApp::new().await;
    let alice = app.signup("alice").await;

    let response = app.get("/api/projects/does-not-exist", &alice).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn project_list_is_paginated() {
    let mut config = test_config();
    config.page_size = 2;
    let app = TestApp::with_config(config).await;
    let alice = app.signup("alice").await;
    for title in ["One", "Two", "Three"] {
        app.create_project(&alice, title).await;
    }

    let first = app.get("/api/projects", &alice).await;
    assert_eq!(first.body["count"], 3);
    assert_eq!(first.body["results"].as_array().unwrap().len(), 2);
    assert_eq!(first.body["next"], "/api/projects?page=2");
    assert_eq!(first.body["previous"], json!(null));

    let second = app.get("/api/projects?page=2", &alice).await;
    assert_eq!(second.body["results"][0]["title"], "Three");
    assert_eq!(second.body["next"], json!(null));
    assert_eq!(second.body["previous"], "/api/projects");

    let past_end = app.get("/api/projects?page=3", &alice).await;
    assert_eq!(past_end.status, StatusCode::NOT_FOUND);
    assert_eq!(past_end.body["error"], "Invalid page.");
}
