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
    db::models::{ContributorRole, Project, ProjectType, UserRef},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        cache::{CacheKey, CachedJson},
        pagination::{ListQuery, Page, PageRequest},
        permissions::{self, VISIBLE_PROJECT_IDS},
    },
    validation::{FieldErrors, ValidJson, ValidQuery, MAX_TITLE_LEN},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/:id",
            get(get_project)
                .put(replace_project)
                .patch(update_project)
                .delete(delete_project),
        )
}

const PROJECT_SELECT: &str = r#"
    SELECT p.id, p.title, p.description, p.project_type, p.author_id,
           u.username AS author_username, p.created_at
    FROM projects p
    JOIN users u ON u.id = p.author_id
"#;

#[derive(Debug, Deserialize)]
pub struct ProjectPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub project_type: Option<String>,
}

#[derive(Debug)]
struct ProjectChanges {
    title: Option<String>,
    description: Option<String>,
    project_type: Option<ProjectType>,
}

impl ProjectPayload {
    fn validate(self, partial: bool) -> (ProjectChanges, FieldErrors) {
        let mut errors = FieldErrors::new();
        let changes = ProjectChanges {
            title: errors.text("title", self.title, !partial, Some(MAX_TITLE_LEN)),
            description: errors.text("description", self.description, !partial, None),
            project_type: errors.choice("type", self.project_type, !partial),
        };
        (changes, errors)
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub author: UserRef,
    pub created_at: String,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            title: project.title,
            description: project.description,
            project_type: project.project_type,
            author: UserRef::new(project.author_id, project.author_username),
            created_at: project.created_at,
        }
    }
}

pub(crate) async fn fetch_project(pool: &sqlx::SqlitePool, id: &str) -> Result<Project> {
    sqlx::query_as::<_, Project>(&format!("{PROJECT_SELECT} WHERE p.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))
}

async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
    OriginalUri(uri): OriginalUri,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<CachedJson> {
    let page = PageRequest::new(query.page.as_deref(), state.config.page_size)?;
    let key = CacheKey::new(&user.id, &uri);

    state
        .cache
        .get_or_compute(key, || project_page(&state, &user.id, page, &uri))
        .await
}

async fn project_page(
    state: &AppState,
    user_id: &str,
    page: PageRequest,
    uri: &Uri,
) -> Result<Value> {
    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM projects p WHERE p.id IN ({VISIBLE_PROJECT_IDS})"
    ))
    .bind(user_id)
    .bind(user_id)
    .fetch_one(&state.db.pool)
    .await?;
    page.check(count)?;

    let projects = sqlx::query_as::<_, Project>(&format!(
        "{PROJECT_SELECT} WHERE p.id IN ({VISIBLE_PROJECT_IDS})
         ORDER BY p.created_at ASC, p.rowid ASC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let results: Vec<ProjectResponse> = projects.into_iter().map(Into::into).collect();
    Page::new(results, count, page, uri).into_value()
}

async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(body): ValidJson<ProjectPayload>,
) -> Result<(StatusCode, Json<ProjectResponse>)> {
    let (changes, errors) = body.validate(false);
    let ProjectChanges {
        title: Some(title),
        description: Some(description),
        project_type: Some(project_type),
    } = changes
    else {
        return Err(AppError::Validation(errors));
    };

    let project_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    // The author is always a contributor of their own project
    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO projects (id, title, description, project_type, author_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&project_id)
    .bind(&title)
    .bind(&description)
    .bind(project_type.as_str())
    .bind(&user.id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO contributors (id, user_id, project_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(&project_id)
    .bind(ContributorRole::Author.as_str())
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    state.cache.invalidate_users([user.id.clone()]).await;
    tracing::info!(project = %project_id, author = %user.id, "project created");

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            id: project_id,
            title,
            description,
            project_type: project_type.to_string(),
            author: UserRef::new(user.id, user.username),
            created_at: now,
        }),
    ))
}

async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &project.id, &user.id).await?;

    Ok(Json(project.into()))
}

async fn replace_project(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<ProjectPayload>,
) -> Result<Json<ProjectResponse>> {
    apply_update(state, user, id, body, false).await
}

async fn update_project(
    state: State<AppState>,
    user: AuthUser,
    id: Path<String>,
    body: ValidJson<ProjectPayload>,
) -> Result<Json<ProjectResponse>> {
    apply_update(state, user, id, body, true).await
}

async fn apply_update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<ProjectPayload>,
    partial: bool,
) -> Result<Json<ProjectResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &project.id, &user.id).await?;
    permissions::require_author(&project.author_id, &user.id)?;

    let (changes, errors) = body.validate(partial);
    errors.into_result()?;

    sqlx::query(
        r#"
        UPDATE projects SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            project_type = COALESCE(?, project_type)
        WHERE id = ?
        "#,
    )
    .bind(changes.title)
    .bind(changes.description)
    .bind(changes.project_type.map(|t| t.as_str()))
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    let members = permissions::project_members(&state.db.pool, &id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(project = %id, "project updated");

    let project = fetch_project(&state.db.pool, &id).await?;
    Ok(Json(project.into()))
}

async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let project = fetch_project(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &project.id, &user.id).await?;
    permissions::require_author(&project.author_id, &user.id)?;

    // Collect members before the cascade removes them
    let members = permissions::project_members(&state.db.pool, &id).await?;

    // Cascades to contributors, issues and their comments
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    state.cache.invalidate_users(members).await;
    tracing::info!(project = %id, "project deleted");

    Ok(StatusCode::NO_CONTENT)
}
