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
    db::models::{Issue, Priority, Status, Tag, UserRef},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::projects::fetch_project,
    services::{
        cache::{CacheKey, CachedJson},
        pagination::{ListQuery, Page, PageRequest},
        permissions::{self, VISIBLE_PROJECT_IDS},
    },
    validation::{nullable, FieldErrors, ValidJson, ValidQuery, MAX_TITLE_LEN},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_issues).post(create_issue))
        .route(
            "/:id",
            get(get_issue)
                .put(replace_issue)
                .patch(update_issue)
                .delete(delete_issue),
        )
}

const ISSUE_SELECT: &str = r#"
    SELECT i.id, i.title, i.description, i.priority, i.tag, i.status, i.project_id,
           i.author_id, au.username AS author_username,
           i.assignee_id, asg.username AS assignee_username,
           i.created_at
    FROM issues i
    JOIN users au ON au.id = i.author_id
    LEFT JOIN users asg ON asg.id = i.assignee_id
"#;

const NOT_ASSIGNABLE: &str = "The assignee must be a contributor of the project.";

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub tag: Option<String>,
    pub status: Option<String>,
    pub project: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee: Option<Option<String>>,
}

#[derive(Debug)]
struct IssueChanges {
    title: Option<String>,
    description: Option<String>,
    priority: Option<Priority>,
    tag: Option<Tag>,
    status: Option<Status>,
    /// `Some(None)` clears the assignee.
    assignee: Option<Option<String>>,
}

impl IssuePayload {
    fn validate(self, partial: bool, errors: &mut FieldErrors) -> IssueChanges {
        IssueChanges {
            title: errors.text("title", self.title, !partial, Some(MAX_TITLE_LEN)),
            description: errors.text("description", self.description, !partial, None),
            priority: errors.choice("priority", self.priority, !partial),
            tag: errors.choice("tag", self.tag, !partial),
            status: errors.choice("status", self.status, false),
            assignee: self.assignee,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IssueResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub tag: String,
    pub status: String,
    pub project: String,
    pub author: UserRef,
    pub assignee: Option<UserRef>,
    pub created_at: String,
}

impl From<Issue> for IssueResponse {
    fn from(issue: Issue) -> Self {
        let assignee = match (issue.assignee_id, issue.assignee_username) {
            (Some(id), Some(username)) => Some(UserRef::new(id, username)),
            _ => None,
        };

        Self {
            id: issue.id,
            title: issue.title,
            description: issue.description,
            priority: issue.priority,
            tag: issue.tag,
            status: issue.status,
            project: issue.project_id,
            author: UserRef::new(issue.author_id, issue.author_username),
            assignee,
            created_at: issue.created_at,
        }
    }
}

pub(crate) async fn fetch_issue(pool: &sqlx::SqlitePool, id: &str) -> Result<Issue> {
    sqlx::query_as::<_, Issue>(&format!("{ISSUE_SELECT} WHERE i.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Issue not found".to_string()))
}

async fn check_assignee(
    pool: &sqlx::SqlitePool,
    project_id: &str,
    assignee: &Option<Option<String>>,
) -> Result<()> {
    if let Some(Some(assignee_id)) = assignee {
        if !permissions::is_contributor(pool, project_id, assignee_id).await? {
            return Err(AppError::field("assignee", NOT_ASSIGNABLE));
        }
    }
    Ok(())
}

async fn list_issues(
    State(state): State<AppState>,
    user: AuthUser,
    OriginalUri(uri): OriginalUri,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<CachedJson> {
    let page = PageRequest::new(query.page.as_deref(), state.config.page_size)?;
    if let Some(project_id) = &query.project {
        permissions::require_contributor(&state.db.pool, project_id, &user.id).await?;
    }

    let key = CacheKey::new(&user.id, &uri);
    state
        .cache
        .get_or_compute(key, || {
            issue_page(&state, &user.id, query.project.as_deref(), page, &uri)
        })
        .await
}

async fn issue_page(
    state: &AppState,
    user_id: &str,
    project_id: Option<&str>,
    page: PageRequest,
    uri: &Uri,
) -> Result<Value> {
    let filter =
        format!("i.project_id IN ({VISIBLE_PROJECT_IDS}) AND (? IS NULL OR i.project_id = ?)");

    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM issues i WHERE {filter}"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(project_id)
    .bind(project_id)
    .fetch_one(&state.db.pool)
    .await?;
    page.check(count)?;

    let issues = sqlx::query_as::<_, Issue>(&format!(
        "{ISSUE_SELECT} WHERE {filter}
         ORDER BY i.created_at ASC, i.rowid ASC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(project_id)
    .bind(project_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let results: Vec<IssueResponse> = issues.into_iter().map(Into::into).collect();
    Page::new(results, count, page, uri).into_value()
}

async fn create_issue(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(body): ValidJson<IssuePayload>,
) -> Result<(StatusCode, Json<IssueResponse>)> {
    let mut errors = FieldErrors::new();
    let project_id = errors.text("project", body.project.clone(), true, None);
    let changes = body.validate(false, &mut errors);

    // Membership is settled before any other field error is reported
    if let Some(id) = &project_id {
        match fetch_project(&state.db.pool, id).await {
            Ok(_) => permissions::require_contributor(&state.db.pool, id, &user.id).await?,
            Err(AppError::NotFound(_)) => {
                errors.add("project", format!("Invalid pk \"{id}\" - object does not exist."))
            }
            Err(err) => return Err(err),
        }
    }

    let (
        Some(project_id),
        IssueChanges {
            title: Some(title),
            description: Some(description),
            priority: Some(priority),
            tag: Some(tag),
            status,
            assignee,
        },
    ) = (project_id, changes)
    else {
        return Err(AppError::Validation(errors));
    };
    errors.into_result()?;

    check_assignee(&state.db.pool, &project_id, &assignee).await?;

    let issue_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO issues (id, title, description, priority, tag, status, project_id, author_id, assignee_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&issue_id)
    .bind(&title)
    .bind(&description)
    .bind(priority.as_str())
    .bind(tag.as_str())
    .bind(status.unwrap_or(Status::Todo).as_str())
    .bind(&project_id)
    .bind(&user.id)
    .bind(assignee.flatten())
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    let members = permissions::project_members(&state.db.pool, &project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(issue = %issue_id, project = %project_id, author = %user.id, "issue created");

    let issue = fetch_issue(&state.db.pool, &issue_id).await?;
    Ok((StatusCode::CREATED, Json(issue.into())))
}

async fn get_issue(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<IssueResponse>> {
    let issue = fetch_issue(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &issue.project_id, &user.id).await?;

    Ok(Json(issue.into()))
}

async fn replace_issue(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<IssuePayload>,
) -> Result<Json<IssueResponse>> {
    apply_update(state, user, id, body, false).await
}

async fn update_issue(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<IssuePayload>,
) -> Result<Json<IssueResponse>> {
    apply_update(state, user, id, body, true).await
}

async fn apply_update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<IssuePayload>,
    partial: bool,
) -> Result<Json<IssueResponse>> {
    let issue = fetch_issue(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &issue.project_id, &user.id).await?;
    permissions::require_author(&issue.author_id, &user.id)?;

    // PUT names the project like create does, but it can never change
    let mut errors = FieldErrors::new();
    let project = errors.text("project", body.project.clone(), !partial, None);
    if project.is_some_and(|project| project != issue.project_id) {
        errors.add("project", "An issue cannot be moved to another project.");
    }
    let changes = body.validate(partial, &mut errors);
    errors.into_result()?;

    check_assignee(&state.db.pool, &issue.project_id, &changes.assignee).await?;

    sqlx::query(
        r#"
        UPDATE issues SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            priority = COALESCE(?, priority),
            tag = COALESCE(?, tag),
            status = COALESCE(?, status),
            assignee_id = CASE WHEN ? THEN ? ELSE assignee_id END
        WHERE id = ?
        "#,
    )
    .bind(changes.title)
    .bind(changes.description)
    .bind(changes.priority.map(|p| p.as_str()))
    .bind(changes.tag.map(|t| t.as_str()))
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.assignee.is_some())
    .bind(changes.assignee.flatten())
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    let members = permissions::project_members(&state.db.pool, &issue.project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(issue = %id, "issue updated");

    let issue = fetch_issue(&state.db.pool, &id).await?;
    Ok(Json(issue.into()))
}

async fn delete_issue(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let issue = fetch_issue(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &issue.project_id, &user.id).await?;
    permissions::require_author(&issue.author_id, &user.id)?;

    // Cascades to the issue's comments
    sqlx::query("DELETE FROM issues WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    let members = permissions::project_members(&state.db.pool, &issue.project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(issue = %id, "issue deleted");

    Ok(StatusCode::NO_CONTENT)
}
