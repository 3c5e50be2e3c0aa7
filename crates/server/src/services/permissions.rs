//! Access rules shared by the resource routes.
//!
//! Reading anything that belongs to a project requires being one of its
//! contributors. Changing or deleting a resource requires being its author.
//! Every check fails closed with a 403 rather than filtering results.

use sqlx::SqlitePool;

use crate::error::{AppError, Result};

pub const NOT_CONTRIBUTOR: &str = "You must be a contributor to this project.";
pub const NOT_AUTHOR: &str = "Only the resource author can modify or delete.";
pub const NOT_PROJECT_AUTHOR: &str = "Only the project author can perform this action.";
pub const NOT_SELF: &str = "You can only access your own account.";

/// Subquery yielding the ids of every project the user can see. Bind the
/// user id twice.
pub const VISIBLE_PROJECT_IDS: &str = r#"
    SELECT vp.id FROM projects vp
    WHERE vp.author_id = ?
       OR EXISTS (SELECT 1 FROM contributors vc WHERE vc.project_id = vp.id AND vc.user_id = ?)
"#;

pub async fn is_contributor(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM projects p
        WHERE p.id = ?
          AND (p.author_id = ?
               OR EXISTS (SELECT 1 FROM contributors c
                          WHERE c.project_id = p.id AND c.user_id = ?))
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

pub async fn require_contributor(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<()> {
    if is_contributor(pool, project_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden(NOT_CONTRIBUTOR.to_string()))
    }
}

pub fn require_author(author_id: &str, user_id: &str) -> Result<()> {
    if author_id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(NOT_AUTHOR.to_string()))
    }
}

pub fn require_project_author(project_author_id: &str, user_id: &str) -> Result<()> {
    if project_author_id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(NOT_PROJECT_AUTHOR.to_string()))
    }
}

pub fn require_self(account_id: &str, user_id: &str) -> Result<()> {
    if account_id == user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(NOT_SELF.to_string()))
    }
}

/// Everyone who can see the project: its author and its contributors.
pub async fn project_members(pool: &SqlitePool, project_id: &str) -> Result<Vec<String>> {
    let members = sqlx::query_scalar::<_, String>(
        r#"
        SELECT author_id FROM projects WHERE id = ?
        UNION
        SELECT user_id FROM contributors WHERE project_id = ?
        "#,
    )
    .bind(project_id)
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_check_compares_ids() {
        assert!(require_author("u1", "u1").is_ok());
        assert!(matches!(
            require_author("u1", "u2"),
            Err(AppError::Forbidden(msg)) if msg == NOT_AUTHOR
        ));
    }

    #[test]
    fn project_author_and_self_checks_fail_closed() {
        assert!(require_project_author("u1", "u1").is_ok());
        assert!(matches!(
            require_project_author("u1", "u2"),
            Err(AppError::Forbidden(_))
        ));
        assert!(require_self("u1", "u1").is_ok());
        assert!(matches!(require_self("u1", "u2"), Err(AppError::Forbidden(_))));
    }
}
