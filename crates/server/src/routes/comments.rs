use axum::{
    extract::{OriginalUri, Path, State},
    http::{StatusCode, Uri},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    db::models::{Comment, UserRef},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::issues::fetch_issue,
    services::{
        cache::{CacheKey, CachedJson},
        pagination::{ListQuery, Page, PageRequest},
        permissions::{self, VISIBLE_PROJECT_IDS},
    },
    validation::{FieldErrors, ValidJson, ValidQuery},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_comments).post(create_comment))
        .route(
            "/:id",
            get(get_comment)
                .put(replace_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
}

const COMMENT_SELECT: &str = r#"
    SELECT cm.id, cm.issue_id, i.project_id, cm.author_id,
           u.username AS author_username, cm.description, cm.created_at
    FROM comments cm
    JOIN issues i ON i.id = cm.issue_id
    JOIN users u ON u.id = cm.author_id
"#;

#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub description: Option<String>,
    pub issue: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: String,
    pub description: String,
    pub issue: String,
    pub project: String,
    pub author: UserRef,
    pub created_at: String,
}

impl From<Comment> for CommentResponse {
    fn from(comment: Comment) -> Self {
        Self {
            id: comment.id,
            description: comment.description,
            issue: comment.issue_id,
            project: comment.project_id,
            author: UserRef::new(comment.author_id, comment.author_username),
            created_at: comment.created_at,
        }
    }
}

async fn fetch_comment(pool: &sqlx::SqlitePool, id: &str) -> Result<Comment> {
    sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE cm.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

async fn list_comments(
    State(state): State<AppState>,
    user: AuthUser,
    OriginalUri(uri): OriginalUri,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<CachedJson> {
    let page = PageRequest::new(query.page.as_deref(), state.config.page_size)?;
    if let Some(issue_id) = &query.issue {
        let issue = fetch_issue(&state.db.pool, issue_id).await?;
        permissions::require_contributor(&state.db.pool, &issue.project_id, &user.id).await?;
    }
    if let Some(project_id) = &query.project {
        permissions::require_contributor(&state.db.pool, project_id, &user.id).await?;
    }

    let key = CacheKey::new(&user.id, &uri);
    state
        .cache
        .get_or_compute(key, || comment_page(&state, &user.id, &query, page, &uri))
        .await
}

async fn comment_page(
    state: &AppState,
    user_id: &str,
    query: &ListQuery,
    page: PageRequest,
    uri: &Uri,
) -> Result<Value> {
    let filter = format!(
        "i.project_id IN ({VISIBLE_PROJECT_IDS})
         AND (? IS NULL OR cm.issue_id = ?)
         AND (? IS NULL OR i.project_id = ?)"
    );
    let issue_id = query.issue.as_deref();
    let project_id = query.project.as_deref();

    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM comments cm JOIN issues i ON i.id = cm.issue_id WHERE {filter}"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(issue_id)
    .bind(issue_id)
    .bind(project_id)
    .bind(project_id)
    .fetch_one(&state.db.pool)
    .await?;
    page.check(count)?;

    let comments = sqlx::query_as::<_, Comment>(&format!(
        "{COMMENT_SELECT} WHERE {filter}
         ORDER BY cm.created_at ASC, cm.rowid ASC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(issue_id)
    .bind(issue_id)
    .bind(project_id)
    .bind(project_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let results: Vec<CommentResponse> = comments.into_iter().map(Into::into).collect();
    Page::new(results, count, page, uri).into_value()
}

async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(body): ValidJson<CommentPayload>,
) -> Result<(StatusCode, Json<CommentResponse>)> {
    let mut errors = FieldErrors::new();
    let description = errors.text("description", body.description, true, None);
    let issue_id = errors.text("issue", body.issue, true, None);

    let mut issue = None;
    if let Some(id) = &issue_id {
        match fetch_issue(&state.db.pool, id).await {
            Ok(found) => {
                permissions::require_contributor(&state.db.pool, &found.project_id, &user.id)
                    .await?;
                issue = Some(found);
            }
            Err(AppError::NotFound(_)) => {
                errors.add("issue", format!("Invalid pk \"{id}\" - object does not exist."))
            }
            Err(err) => return Err(err),
        }
    }

    let (Some(description), Some(issue)) = (description, issue) else {
        return Err(AppError::Validation(errors));
    };

    let comment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO comments (id, issue_id, author_id, description, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&comment_id)
    .bind(&issue.id)
    .bind(&user.id)
    .bind(&description)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    let members = permissions::project_members(&state.db.pool, &issue.project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(comment = %comment_id, issue = %issue.id, author = %user.id, "comment created");

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: comment_id,
            description,
            issue: issue.id,
            project: issue.project_id,
            author: UserRef::new(user.id, user.username),
            created_at: now,
        }),
    ))
}

async fn get_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CommentResponse>> {
    let comment = fetch_comment(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &comment.project_id, &user.id).await?;

    Ok(Json(comment.into()))
}

async fn replace_comment(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<CommentPayload>,
) -> Result<Json<CommentResponse>> {
    apply_update(state, user, id, body, false).await
}

async fn update_comment(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<CommentPayload>,
) -> Result<Json<CommentResponse>> {
    apply_update(state, user, id, body, true).await
}

async fn apply_update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<CommentPayload>,
    partial: bool,
) -> Result<Json<CommentResponse>> {
    let comment = fetch_comment(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &comment.project_id, &user.id).await?;
    permissions::require_author(&comment.author_id, &user.id)?;

    let mut errors = FieldErrors::new();
    let issue = errors.text("issue", body.issue, !partial, None);
    if issue.is_some_and(|issue| issue != comment.issue_id) {
        errors.add("issue", "A comment cannot be moved to another issue.");
    }
    let description = errors.text("description", body.description, !partial, None);
    errors.into_result()?;

    sqlx::query("UPDATE comments SET description = COALESCE(?, description) WHERE id = ?")
        .bind(description)
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    let members = permissions::project_members(&state.db.pool, &comment.project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(comment = %id, "comment updated");

    let comment = fetch_comment(&state.db.pool, &id).await?;
    Ok(Json(comment.into()))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let comment = fetch_comment(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &comment.project_id, &user.id).await?;
    permissions::require_author(&comment.author_id, &user.id)?;

    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    let members = permissions::project_members(&state.db.pool, &comment.project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(comment = %id, "comment deleted");

    Ok(StatusCode::NO_CONTENT)
}
