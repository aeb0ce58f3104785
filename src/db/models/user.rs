//! User models and login request/response bodies.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role assigned to every user created through local login
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    #[serde(rename = "user_id")]
    pub id: i64,
    pub user_name: String,
    pub created_at: String,
    pub role: String,
}

/// Outcome of resolving a username at login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedUser {
    pub id: i64,
    /// True when this call inserted the row
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
}

/// `{"message": ...}` body shared by the auth endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
