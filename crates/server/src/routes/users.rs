use axum::{
    extract::{OriginalUri, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::User,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::auth::hash_password,
    services::{
        pagination::{ListQuery, Page, PageRequest},
        permissions,
    },
    validation::{FieldErrors, ValidJson, ValidQuery},
    AppState,
};

const MAX_USERNAME_LEN: usize = 150;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route(
            "/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub age: Option<i64>,
    pub can_be_contacted: Option<bool>,
    pub can_data_be_shared: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub age: i64,
    pub can_be_contacted: bool,
    pub can_data_be_shared: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            age: user.age,
            can_be_contacted: user.can_be_contacted,
            can_data_be_shared: user.can_data_be_shared,
            created_at: user.created_at,
        }
    }
}

fn check_username(
    errors: &mut FieldErrors,
    value: Option<String>,
    required: bool,
) -> Option<String> {
    let username = errors.text("username", value, required, Some(MAX_USERNAME_LEN))?;
    let allowed = |c: char| c.is_alphanumeric() || "@.+-_".contains(c);
    if !username.chars().all(allowed) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
        return None;
    }
    Some(username)
}

async fn username_taken(
    pool: &sqlx::SqlitePool,
    username: &str,
    except_id: Option<&str>,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? AND id IS NOT ?",
    )
    .bind(username)
    .bind(except_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

async fn fetch_user(pool: &sqlx::SqlitePool, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn list_users(
    State(state): State<AppState>,
    _user: AuthUser,
    OriginalUri(uri): OriginalUri,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<Json<Page<UserResponse>>> {
    let page = PageRequest::new(query.page.as_deref(), state.config.page_size)?;

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db.pool)
        .await?;
    page.check(count)?;

    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
    )
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let results = users.into_iter().map(UserResponse::from).collect();
    Ok(Json(Page::new(results, count, page, &uri)))
}

async fn create_user(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<UserPayload>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let mut errors = FieldErrors::new();
    let username = check_username(&mut errors, body.username, true);
    let email = errors.email(body.email, true);
    let password = errors.password(body.password, true);
    let age = errors.age(body.age, true);

    if let Some(username) = &username {
        if username_taken(&state.db.pool, username, None).await? {
            errors.add("username", "A user with that username already exists.");
        }
    }

    let (Some(username), Some(email), Some(password), Some(age)) = (username, email, password, age)
    else {
        return Err(AppError::Validation(errors));
    };
    errors.into_result()?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        email,
        password_hash: hash_password(&password)?,
        age,
        can_be_contacted: body.can_be_contacted.unwrap_or(false),
        can_data_be_shared: body.can_data_be_shared.unwrap_or(false),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, age, can_be_contacted, can_data_be_shared, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.age)
    .bind(user.can_be_contacted)
    .bind(user.can_data_be_shared)
    .bind(&user.created_at)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(user = %user.id, username = %user.username, "user created");

    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>> {
    let user = fetch_user(&state.db.pool, &id).await?;
    Ok(Json(user.into()))
}

async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<UserPayload>,
) -> Result<Json<UserResponse>> {
    fetch_user(&state.db.pool, &id).await?;
    permissions::require_self(&id, &user.id)?;

    let mut errors = FieldErrors::new();
    let username = check_username(&mut errors, body.username, false);
    let email = errors.email(body.email, false);
    let password = errors.password(body.password, false);
    let age = errors.age(body.age, false);

    if let Some(username) = &username {
        if username_taken(&state.db.pool, username, Some(&id)).await? {
            errors.add("username", "A user with that username already exists.");
        }
    }
    errors.into_result()?;

    let password_hash = password.as_deref().map(hash_password).transpose()?;

    sqlx::query(
        r#"
        UPDATE users SET
            username = COALESCE(?, username),
            email = COALESCE(?, email),
            password_hash = COALESCE(?, password_hash),
            age = COALESCE(?, age),
            can_be_contacted = COALESCE(?, can_be_contacted),
            can_data_be_shared = COALESCE(?, can_data_be_shared)
        WHERE id = ?
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(age)
    .bind(body.can_be_contacted)
    .bind(body.can_data_be_shared)
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    // Usernames are embedded in every cached listing.
    state.cache.invalidate_all();

    let updated = fetch_user(&state.db.pool, &id).await?;
    Ok(Json(updated.into()))
}

async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    fetch_user(&state.db.pool, &id).await?;
    permissions::require_self(&id, &user.id)?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    state.cache.invalidate_all();
    tracing::info!(user = %id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}
