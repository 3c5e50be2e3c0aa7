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
    db::models::{Contributor, ContributorRole, UserRef},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::projects::fetch_project,
    services::{
        cache::{CacheKey, CachedJson},
        pagination::{ListQuery, Page, PageRequest},
        permissions::{self, VISIBLE_PROJECT_IDS},
    },
    validation::{FieldErrors, ValidJson, ValidQuery, NON_FIELD_ERRORS},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_contributors).post(add_contributor))
        .route("/:id", get(get_contributor).delete(remove_contributor))
}

const CONTRIBUTOR_SELECT: &str = r#"
    SELECT c.id, c.project_id, c.user_id, u.username, c.role, c.created_at
    FROM contributors c
    JOIN users u ON u.id = c.user_id
"#;

#[derive(Debug, Deserialize)]
pub struct AddContributorRequest {
    pub user: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContributorResponse {
    pub id: String,
    pub user: UserRef,
    pub project: String,
    pub role: String,
    pub created_at: String,
}

impl From<Contributor> for ContributorResponse {
    fn from(contributor: Contributor) -> Self {
        Self {
            id: contributor.id,
            user: UserRef::new(contributor.user_id, contributor.username),
            project: contributor.project_id,
            role: contributor.role,
            created_at: contributor.created_at,
        }
    }
}

async fn fetch_contributor(pool: &sqlx::SqlitePool, id: &str) -> Result<Contributor> {
    sqlx::query_as::<_, Contributor>(&format!("{CONTRIBUTOR_SELECT} WHERE c.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Contributor not found".to_string()))
}

async fn list_contributors(
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
            contributor_page(&state, &user.id, query.project.as_deref(), page, &uri)
        })
        .await
}

async fn contributor_page(
    state: &AppState,
    user_id: &str,
    project_id: Option<&str>,
    page: PageRequest,
    uri: &Uri,
) -> Result<Value> {
    let filter =
        format!("c.project_id IN ({VISIBLE_PROJECT_IDS}) AND (? IS NULL OR c.project_id = ?)");

    let count = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM contributors c WHERE {filter}"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(project_id)
    .bind(project_id)
    .fetch_one(&state.db.pool)
    .await?;
    page.check(count)?;

    let contributors = sqlx::query_as::<_, Contributor>(&format!(
        "{CONTRIBUTOR_SELECT} WHERE {filter}
         ORDER BY c.created_at ASC, c.rowid ASC LIMIT ? OFFSET ?"
    ))
    .bind(user_id)
    .bind(user_id)
    .bind(project_id)
    .bind(project_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let results: Vec<ContributorResponse> = contributors.into_iter().map(Into::into).collect();
    Page::new(results, count, page, uri).into_value()
}

async fn add_contributor(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(body): ValidJson<AddContributorRequest>,
) -> Result<(StatusCode, Json<ContributorResponse>)> {
    let mut errors = FieldErrors::new();
    let project_id = errors.text("project", body.project, true, None);
    let target_id = errors.text("user", body.user, true, None);
    let (Some(project_id), Some(target_id)) = (project_id, target_id) else {
        return Err(AppError::Validation(errors));
    };

    let project = match fetch_project(&state.db.pool, &project_id).await {
        Ok(project) => project,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::field(
                "project",
                format!("Invalid pk \"{project_id}\" - object does not exist."),
            ))
        }
        Err(err) => return Err(err),
    };

    // Only the project author manages membership
    permissions::require_project_author(&project.author_id, &user.id)?;

    let target_exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(&target_id)
        .fetch_one(&state.db.pool)
        .await?;
    if target_exists == 0 {
        return Err(AppError::field(
            "user",
            format!("Invalid pk \"{target_id}\" - object does not exist."),
        ));
    }

    let already = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM contributors WHERE project_id = ? AND user_id = ?",
    )
    .bind(&project_id)
    .bind(&target_id)
    .fetch_one(&state.db.pool)
    .await?;
    if already > 0 {
        return Err(AppError::field(
            NON_FIELD_ERRORS,
            "The fields user, project must make a unique set.",
        ));
    }

    let contributor_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO contributors (id, user_id, project_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&contributor_id)
    .bind(&target_id)
    .bind(&project_id)
    .bind(ContributorRole::Contributor.as_str())
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    // The new member now sees the project too
    let members = permissions::project_members(&state.db.pool, &project_id).await?;
    state.cache.invalidate_users(members).await;
    tracing::info!(project = %project_id, user = %target_id, "contributor added");

    let contributor = fetch_contributor(&state.db.pool, &contributor_id).await?;
    Ok((StatusCode::CREATED, Json(contributor.into())))
}

async fn get_contributor(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ContributorResponse>> {
    let contributor = fetch_contributor(&state.db.pool, &id).await?;
    permissions::require_contributor(&state.db.pool, &contributor.project_id, &user.id).await?;

    Ok(Json(contributor.into()))
}

async fn remove_contributor(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let contributor = fetch_contributor(&state.db.pool, &id).await?;
    let project = fetch_project(&state.db.pool, &contributor.project_id).await?;
    permissions::require_project_author(&project.author_id, &user.id)?;

    if contributor.role == ContributorRole::Author.as_str() {
        return Err(AppError::field(
            NON_FIELD_ERRORS,
            "The project author cannot be removed from the project.",
        ));
    }

    // Collected first so the removed user's cached lists go too
    let members = permissions::project_members(&state.db.pool, &project.id).await?;

    let mut tx = state.db.pool.begin().await?;

    sqlx::query("UPDATE issues SET assignee_id = NULL WHERE project_id = ? AND assignee_id = ?")
        .bind(&project.id)
        .bind(&contributor.user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM contributors WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    state.cache.invalidate_users(members).await;
    tracing::info!(project = %project.id, user = %contributor.user_id, "contributor removed");

    Ok(StatusCode::NO_CONTENT)
}
