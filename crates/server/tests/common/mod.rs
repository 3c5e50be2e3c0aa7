#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use softdesk_server::{app, config::Config, db::Database, AppState};
use tower::ServiceExt;

pub fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test-secret".to_string(),
        token_ttl_hours: 1,
        cache_ttl_secs: 300,
        cache_capacity: 1_000,
        page_size: 10,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn cache_status(&self) -> Option<&str> {
        self.headers.get("x-cache").and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = Database::connect(&config.database_url)
            .await
            .expect("in-memory database");
        db.run_migrations().await.expect("migrations");

        let state = AppState::new(db, config);
        Self {
            router: app(state.clone()),
            state,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> TestResponse {
        self.request(Method::GET, uri, Some(&user.token), None).await
    }

    pub async fn post(&self, uri: &str, user: &TestUser, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(&user.token), Some(body))
            .await
    }

    pub async fn patch(&self, uri: &str, user: &TestUser, body: Value) -> TestResponse {
        self.request(Method::PATCH, uri, Some(&user.token), Some(body))
            .await
    }

    pub async fn put(&self, uri: &str, user: &TestUser, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, Some(&user.token), Some(body))
            .await
    }

    pub async fn delete(&self, uri: &str, user: &TestUser) -> TestResponse {
        self.request(Method::DELETE, uri, Some(&user.token), None)
            .await
    }

    /// Registers an account and logs it in.
    pub async fn signup(&self, username: &str) -> TestUser {
        let created = self
            .request(
                Method::POST,
                "/api/users",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "s3cret-pass",
                    "age": 30,
                })),
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{:?}", created.body);

        let login = self
            .request(
                Method::POST,
                "/api/token",
                None,
                Some(json!({ "username": username, "password": "s3cret-pass" })),
            )
            .await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.body);

        TestUser {
            id: created.body["id"].as_str().unwrap().to_string(),
            username: username.to_string(),
            token: login.body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn create_project(&self, author: &TestUser, title: &str) -> String {
        let response = self
            .post(
                "/api/projects",
                author,
                json!({ "title": title, "description": "Issue tracker", "type": "BACKEND" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    pub async fn add_contributor(
        &self,
        author: &TestUser,
        project_id: &str,
        user: &TestUser,
    ) -> String {
        let response = self
            .post(
                "/api/contributors",
                author,
                json!({ "user": user.id, "project": project_id }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_issue(&self, author: &TestUser, project_id: &str) -> String {
        let response = self
            .post(
                "/api/issues",
                author,
                json!({
                    "title": "Login fails",
                    "description": "500 on submit",
                    "priority": "HIGH",
                    "tag": "BUG",
                    "project": project_id,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_comment(&self, author: &TestUser, issue_id: &str) -> String {
        let response = self
            .post(
                "/api/comments",
                author,
                json!({ "description": "Reproduced on staging", "issue": issue_id }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    pub async fn count_rows(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.state.db.pool)
            .await
            .unwrap()
    }
}
