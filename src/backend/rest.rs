//! HTTP surface of the reference backend (axum).
//!
//! - `/auth/*`: login, second-factor verification, profile, password recovery
//! - `/autotrader/stock`, `/videos`: bearer-protected inventory and catalog reads
//!
//! One-time codes and reset tokens are "delivered" as log lines; real delivery is
//! an external service.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::auth::{hash_password, one_time_code, verify_password, Claims, TokenIssuer};
use super::store::{BackendStore, UserRecord};
use crate::account::MIN_PASSWORD_LEN;
use crate::models::{
    ErrorBody, ForgotPasswordRequest, LoginRequest, LoginResponseBody, ProfileRequest,
    ProfileResponseBody, ResetPasswordRequest, StockSnapshot, VerifyRequest, VideoRecord,
};

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: Some(message.to_string()),
        }),
    )
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    error!(error = %err, "backend failure");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// Shared app state for handlers (Arc-wrapped for concurrency)
pub struct AppState {
    store: BackendStore,
    tokens: TokenIssuer,
    /// Fixed second-factor code for development and tests.
    fixed_code: Option<String>,
}

impl AppState {
    pub fn new(store: BackendStore, tokens: TokenIssuer, fixed_code: Option<String>) -> Self {
        Self {
            store,
            tokens,
            fixed_code,
        }
    }
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let unauthorized = || api_error(StatusCode::UNAUTHORIZED, "Not authorized, token failed");
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;
    let claims = state.tokens.validate(token).map_err(|_| unauthorized())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .route("/auth/profile", put(profile_handler))
        .route("/autotrader/stock", get(stock_handler))
        .route("/videos", get(videos_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/auth/login", post(login_handler))
        .route("/auth/verify-2fa", post(verify_handler))
        .route("/auth/forgot-password", post(forgot_password_handler))
        .route("/auth/reset-password/:token", put(reset_password_handler))
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
}

fn signed_in_body(state: &AppState, user: &UserRecord) -> Result<LoginResponseBody, ApiError> {
    let token = state
        .tokens
        .issue(&user.id, &user.username, user.role)
        .map_err(internal)?;
    Ok(LoginResponseBody {
        token: Some(token),
        role: Some(user.role),
        require_two_factor: None,
        user_id: Some(user.id.clone()),
        username: Some(user.username.clone()),
        email: user.email.clone(),
        phone: user.phone.clone(),
    })
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<LoginResponseBody> {
    let rejected = || api_error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    let user = state
        .store
        .find_user_by_username(&payload.username)
        .map_err(internal)?
        .ok_or_else(rejected)?;

    if !verify_password(&payload.password, &user.password_hash).unwrap_or(false) {
        return Err(rejected());
    }

    if user.two_factor {
        let code = state.fixed_code.clone().unwrap_or_else(one_time_code);
        state.store.put_challenge(&user.id, &code, Utc::now()).map_err(internal)?;
        // Stand-in for SMS/email delivery.
        info!(user = %user.username, %code, "one-time code issued");
        return Ok(Json(LoginResponseBody {
            require_two_factor: Some(true),
            user_id: Some(user.id),
            ..Default::default()
        }));
    }

    Ok(Json(signed_in_body(&state, &user)?))
}

async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyRequest>,
) -> ApiResult<LoginResponseBody> {
    let rejected = || api_error(StatusCode::UNAUTHORIZED, "Invalid or expired code");
    if !state
        .store
        .redeem_challenge(&payload.user_id, &payload.code)
        .map_err(internal)?
    {
        return Err(rejected());
    }
    let user = state
        .store
        .get_user(&payload.user_id)
        .map_err(internal)?
        .ok_or_else(rejected)?;
    Ok(Json(signed_in_body(&state, &user)?))
}

async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ProfileRequest>,
) -> ApiResult<ProfileResponseBody> {
    let mut user = state
        .store
        .get_user(&claims.sub)
        .map_err(internal)?
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "User no longer exists"))?;

    if !verify_password(&payload.current_password, &user.password_hash).unwrap_or(false) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Current password is incorrect"));
    }

    let mut reply = ProfileResponseBody::default();
    if let Some(username) = payload.username.filter(|u| *u != user.username) {
        if let Some(existing) = state.store.find_user_by_username(&username).map_err(internal)? {
            if existing.id != user.id {
                return Err(api_error(StatusCode::CONFLICT, "Username already taken"));
            }
        }
        user.username = username.clone();
        reply.username = Some(username);
    }
    if let Some(password) = payload.new_password {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(api_error(StatusCode::BAD_REQUEST, "Password is too short"));
        }
        user.password_hash = hash_password(&password).map_err(internal)?;
    }
    state.store.update_user(&user).map_err(internal)?;

    if reply.username.is_some() {
        // Token claims carry the username; hand out a fresh one.
        reply.token = Some(
            state
                .tokens
                .issue(&user.id, &user.username, user.role)
                .map_err(internal)?,
        );
    }
    reply.message = "Profile updated successfully".to_string();
    Ok(Json(reply))
}

async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Value> {
    // Same reply whether or not the address is known.
    if let Some(user) = state.store.find_user_by_email(&payload.email).map_err(internal)? {
        let token = uuid::Uuid::new_v4().to_string();
        state.store.put_reset_token(&token, &user.id, Utc::now()).map_err(internal)?;
        info!(user = %user.username, %token, "password reset token issued");
    }
    Ok(Json(json!({})))
}

async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Value> {
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(api_error(StatusCode::BAD_REQUEST, "Password is too short"));
    }
    let invalid = || api_error(StatusCode::BAD_REQUEST, "Reset link is invalid or has expired");
    let user_id = state
        .store
        .take_reset_token(&token)
        .map_err(internal)?
        .ok_or_else(invalid)?;
    let mut user = state
        .store
        .get_user(&user_id)
        .map_err(internal)?
        .ok_or_else(invalid)?;
    user.password_hash = hash_password(&payload.password).map_err(internal)?;
    state.store.update_user(&user).map_err(internal)?;
    info!(user = %user.username, "password reset");
    Ok(Json(json!({})))
}

async fn stock_handler(State(state): State<Arc<AppState>>) -> ApiResult<StockSnapshot> {
    state.store.stock_snapshot().map(Json).map_err(internal)
}

async fn videos_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<VideoRecord>> {
    state.store.videos().map(Json).map_err(internal)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::store::CODE_TTL_SECS;
    use crate::models::Role;
    use axum::body::Body;
    use tower::ServiceExt; // For .oneshot() testing

    fn test_app() -> (Router, BackendStore) {
        let store = BackendStore::open_temporary().expect("store for REST test");
        for (id, username, role, two_factor) in [
            ("u-admin", "admin1", Role::Admin, false),
            ("u-staff", "staff1", Role::Staff, true),
        ] {
            store
                .create_user(UserRecord {
                    id: id.into(),
                    username: username.into(),
                    password_hash: hash_password("secret-pass").unwrap(),
                    role,
                    email: Some(format!("{username}@dealer.example")),
                    phone: None,
                    two_factor,
                })
                .unwrap();
        }
        let state = AppState::new(
            store.clone(),
            TokenIssuer::new(b"rest-test-secret", 600),
            Some("654321".into()),
        );
        (create_router(state), store)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .method(method)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_login_and_protected_reads() {
        let (app, _store) = test_app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/auth/login", json!({"username": "admin1", "password": "secret-pass"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["role"], "admin");
        let token = body["token"].as_str().unwrap().to_string();

        let unauthenticated = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/videos").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/autotrader/stock")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["totalVehicles"], 0);
    }

    #[tokio::test]
    async fn test_bad_password_has_message() {
        let (app, _store) = test_app();
        let response = app
            .oneshot(json_request("POST", "/auth/login", json!({"username": "admin1", "password": "nope"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Invalid username or password");
    }

    #[tokio::test]
    async fn test_two_factor_login_issues_no_token_until_verified() {
        let (app, _store) = test_app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/auth/login", json!({"username": "staff1", "password": "secret-pass"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["requireTwoFactor"], true);
        assert_eq!(body["userId"], "u-staff");
        assert!(body.get("token").is_none());

        let wrong = app
            .clone()
            .oneshot(json_request("POST", "/auth/verify-2fa", json!({"userId": "u-staff", "code": "000000"})))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let right = app
            .oneshot(json_request("POST", "/auth/verify-2fa", json!({"userId": "u-staff", "code": "654321"})))
            .await
            .unwrap();
        assert_eq!(right.status(), StatusCode::OK);
        let body = body_json(right).await;
        assert_eq!(body["username"], "staff1");
        assert_eq!(body["role"], "staff");
    }

    #[tokio::test]
    async fn test_reset_token_is_single_use() {
        let (app, store) = test_app();
        store.put_reset_token("reset-1", "u-admin", Utc::now()).unwrap();

        let first = app
            .clone()
            .oneshot(json_request("PUT", "/auth/reset-password/reset-1", json!({"password": "brand-new"})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(json_request("PUT", "/auth/reset-password/reset-1", json!({"password": "brand-new"})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);

        let admin = store.find_user_by_username("admin1").unwrap().unwrap();
        assert!(verify_password("brand-new", &admin.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_expired_code_is_refused() {
        let (app, store) = test_app();
        let issued = Utc::now() - chrono::Duration::seconds(CODE_TTL_SECS + 1);
        store.put_challenge("u-staff", "654321", issued).unwrap();

        let response = app
            .oneshot(json_request("POST", "/auth/verify-2fa", json!({"userId": "u-staff", "code": "654321"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Invalid or expired code");
    }
}
