//! User directory queries against `gym_users`.

use thiserror::Error;

use crate::db::{DbPool, ResolvedUser, User, DEFAULT_ROLE};

/// Failure while resolving a login username, tagged with the phase that failed
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user lookup failed: {0}")]
    Lookup(#[source] sqlx::Error),
    #[error("user creation failed: {0}")]
    Create(#[source] sqlx::Error),
}

/// Look up a user by username. `Ok(None)` means no such user.
pub async fn find_by_username(pool: &DbPool, username: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT id, user_name, created_at, role FROM gym_users WHERE user_name = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Insert a user with the default role and return the new id.
///
/// Fails with a database error if the username is already taken.
pub async fn create_user(pool: &DbPool, username: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("INSERT INTO gym_users (user_name, role) VALUES (?, ?) RETURNING id")
        .bind(username)
        .bind(DEFAULT_ROLE)
        .fetch_one(pool)
        .await
}

/// Resolve a username to a user id, creating the user if needed.
///
/// The insert is conditional on the `user_name` uniqueness constraint, so
/// concurrent callers with the same new username all end up with the one row
/// that won the insert.
pub async fn find_or_create_user(
    pool: &DbPool,
    username: &str,
) -> Result<ResolvedUser, DirectoryError> {
    let existing = find_by_username(pool, username)
        .await
        .map_err(DirectoryError::Lookup)?;
    if let Some(user) = existing {
        return Ok(ResolvedUser {
            id: user.id,
            created: false,
        });
    }

    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO gym_users (user_name, role) VALUES (?, ?) \
         ON CONFLICT(user_name) DO NOTHING RETURNING id",
    )
    .bind(username)
    .bind(DEFAULT_ROLE)
    .fetch_optional(pool)
    .await
    .map_err(DirectoryError::Create)?;

    match inserted {
        Some(id) => Ok(ResolvedUser { id, created: true }),
        // Lost the insert to a concurrent login
        None => find_by_username(pool, username)
            .await
            .map_err(DirectoryError::Create)?
            .map(|user| ResolvedUser {
                id: user.id,
                created: false,
            })
            .ok_or(DirectoryError::Create(sqlx::Error::RowNotFound)),
    }
}
