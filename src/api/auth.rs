use axum::{
    async_trait,
    body::Body,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::error::ApiError;
use crate::config::SessionConfig;
use crate::db::{users, LoginRequest, MessageResponse};
use crate::session::generate_token;
use crate::AppState;

/// Authenticated user attached to the request by the session middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: i64,
}

/// Build the cookie carrying a freshly issued session token
fn session_cookie(config: &SessionConfig, token: String) -> Cookie<'static> {
    let max_age = i64::try_from(config.max_age_secs).unwrap_or(i64::MAX);
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .secure(false)
        .http_only(true)
        .build()
}

/// Read the session token from the request cookies
fn session_token(jar: &CookieJar, config: &SessionConfig) -> Option<String> {
    jar.get(&config.cookie_name).map(|c| c.value().to_string())
}

/// Local login endpoint
///
/// POST /auth/local/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "Rejected login body");
        ApiError::bad_request("Invalid request body")
    })?;

    if request.username.is_empty() {
        return Err(ApiError::bad_request("Username cannot be empty"));
    }

    let user = users::find_or_create_user(&state.db, &request.username).await?;
    if user.created {
        info!(username = %request.username, user_id = user.id, "New user created");
    } else {
        info!(username = %request.username, user_id = user.id, "User logged in");
    }

    let token = generate_token();
    state.sessions.insert(token.clone(), user.id);

    let jar = jar.add(session_cookie(&state.config.session, token));
    Ok((jar, Json(MessageResponse::new("Local login successful"))))
}

/// Logout endpoint
///
/// POST /auth/local/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let config = &state.config.session;
    let token =
        session_token(&jar, config).ok_or_else(|| ApiError::unauthorized("Not logged in"))?;

    match state.sessions.remove(&token) {
        Some(user_id) => info!(user_id, "User logged out"),
        None => debug!("Logout with unknown session token"),
    }

    let expired = Cookie::build((config.cookie_name.clone(), ""))
        .path("/")
        .http_only(true);
    Ok((jar.remove(expired), Json(MessageResponse::new("Logged out"))))
}

/// Session middleware that gates protected routes on a valid cookie
pub async fn session_auth_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(&jar, &state.config.session)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    let user_id = state
        .sessions
        .get(&token)
        .ok_or_else(|| ApiError::unauthorized("Invalid session"))?;

    request.extensions_mut().insert(CurrentUser { user_id });
    Ok(next.run(request).await)
}

/// Protected data endpoint
///
/// GET /protected
pub async fn protected(user: CurrentUser) -> Json<MessageResponse> {
    Json(MessageResponse::new(format!(
        "Protected data for user ID: {}",
        user.user_id
    )))
}

/// Extractor for the user resolved by `session_auth_middleware`
#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::Config;
    use crate::db;
    use axum::http::{header, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state(config: Config) -> Arc<AppState> {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        Arc::new(AppState::new(config, pool))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, set_cookie, body)
    }

    fn login_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/auth/local/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_cookie(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("session_token={}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Pull the token value out of a `Set-Cookie` header
    fn cookie_value(set_cookie: &str) -> String {
        let pair = set_cookie.split(';').next().unwrap();
        pair.strip_prefix("session_token=").unwrap().to_string()
    }

    async fn login_as(app: &Router, username: &str) -> String {
        let (status, set_cookie, _) =
            send(app, login_request(&format!(r#"{{"username":"{}"}}"#, username))).await;
        assert_eq!(status, StatusCode::OK);
        cookie_value(&set_cookie.unwrap())
    }

    async fn user_count(state: &AppState) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM gym_users")
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_session_cookie() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());

        let (status, set_cookie, body) = send(&app, login_request(r#"{"username":"alice"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Local login successful");

        let set_cookie = set_cookie.unwrap();
        assert!(set_cookie.starts_with("session_token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=3600"));
        assert!(!set_cookie.contains("Secure"));

        let token = cookie_value(&set_cookie);
        assert_eq!(token.len(), 64);
        assert!(!token.contains("alice"));
        assert_eq!(user_count(&state).await, 1);
    }

    #[tokio::test]
    async fn test_login_empty_username_is_rejected() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());

        let (status, set_cookie, body) = send(&app, login_request(r#"{"username":""}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Username cannot be empty");
        assert!(set_cookie.is_none());

        let (status, _, body) = send(&app, login_request("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Username cannot be empty");

        assert_eq!(user_count(&state).await, 0);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_login_malformed_body_is_rejected() {
        let state = test_state(Config::default()).await;
        let app = create_router(state);

        let (status, _, body) = send(&app, login_request("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request body");
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_login_storage_failure_is_server_error() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());
        state.db.close().await;

        let (status, set_cookie, body) = send(&app, login_request(r#"{"username":"x"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            serde_json::json!({"error": "Database error", "code": "database_error"})
        );
        assert!(set_cookie.is_none());
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_login_insert_failure_reports_create_error() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());
        sqlx::query(
            "CREATE TRIGGER reject_users BEFORE INSERT ON gym_users \
             BEGIN SELECT RAISE(ABORT, 'inserts disabled'); END",
        )
        .execute(&state.db)
        .await
        .unwrap();

        let (status, set_cookie, body) = send(&app, login_request(r#"{"username":"y"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to create user");
        assert_eq!(body["code"], "database_error");
        assert!(set_cookie.is_none());
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_login_maps_to_existing_user() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());

        let first = login_as(&app, "bob").await;
        let second = login_as(&app, "bob").await;

        assert_ne!(first, second);
        assert_eq!(state.sessions.get(&first), state.sessions.get(&second));
        assert_eq!(user_count(&state).await, 1);
    }

    #[tokio::test]
    async fn test_protected_resolves_login_user() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());

        login_as(&app, "someone-else").await;
        let token = login_as(&app, "carol").await;

        let user = users::find_by_username(&state.db, "carol")
            .await
            .unwrap()
            .unwrap();

        let (status, _, body) = send(&app, with_cookie("GET", "/protected", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            format!("Protected data for user ID: {}", user.id)
        );
    }

    #[tokio::test]
    async fn test_protected_requires_valid_session() {
        let state = test_state(Config::default()).await;
        let app = create_router(state);

        let (status, _, body) = send(&app, with_cookie("GET", "/protected", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Not authenticated");

        let (status, _, body) = send(&app, with_cookie("GET", "/protected", Some("forged"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid session");
    }

    #[tokio::test]
    async fn test_logout_invalidates_session() {
        let state = test_state(Config::default()).await;
        let app = create_router(state.clone());

        let token = login_as(&app, "dave").await;

        let (status, set_cookie, body) =
            send(&app, with_cookie("POST", "/auth/local/logout", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out");

        let set_cookie = set_cookie.unwrap();
        assert!(set_cookie.starts_with("session_token=;"));
        assert!(set_cookie.contains("Max-Age=0"));

        let (status, _, _) = send(&app, with_cookie("GET", "/protected", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_logout_without_cookie_is_unauthorized() {
        let state = test_state(Config::default()).await;
        let app = create_router(state);

        let (status, _, body) = send(&app, with_cookie("POST", "/auth/local/logout", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Not logged in");
    }

    #[tokio::test]
    async fn test_logout_with_unknown_token_still_succeeds() {
        let state = test_state(Config::default()).await;
        let app = create_router(state);

        let (status, _, body) =
            send(&app, with_cookie("POST", "/auth/local/logout", Some("stale"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out");
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let mut config = Config::default();
        config.session.max_age_secs = 0;
        let state = test_state(config).await;
        let app = create_router(state.clone());

        let token = login_as(&app, "erin").await;

        let (status, _, body) = send(&app, with_cookie("GET", "/protected", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid session");

        state.sessions.cleanup_expired();
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_current_user_without_middleware_is_unauthorized() {
        let app = Router::new().route("/whoami", axum::routing::get(protected));

        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
