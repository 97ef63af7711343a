//! Remote API client.
//!
//! `AuthService` and `InventoryService` are the seams the session manager and the
//! inventory board talk through; `HttpPortalClient` implements both over reqwest.
//! Bearer credentials are always passed in explicitly by the caller.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode, Url};

use crate::error::{PortalError, Result, DEFAULT_LOGIN_FAILURE};
use crate::models::{
    ErrorBody, ForgotPasswordRequest, Identity, LoginReply, LoginRequest, LoginResponseBody,
    ProfileRequest, ProfileResponseBody, ResetPasswordRequest, StockSnapshot, VerifyRequest,
    VideoRecord,
};

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReply>;
    async fn verify_second_factor(&self, subject_id: &str, code: &str) -> Result<Identity>;
    async fn update_profile(&self, credential: &str, change: &ProfileRequest) -> Result<ProfileResponseBody>;
    async fn forgot_password(&self, email: &str) -> Result<()>;
    async fn reset_password(&self, token: &str, password: &str) -> Result<()>;
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn fetch_stock(&self, credential: &str) -> Result<StockSnapshot>;
    async fn fetch_videos(&self, credential: &str) -> Result<Vec<VideoRecord>>;
}

/// How a non-2xx status is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    /// login / verify-2fa: every 4xx is a credential failure.
    Credentials,
    /// Carries a bearer token: 401/403 means the session is gone.
    Bearer,
    Public,
}

#[derive(Clone)]
pub struct HttpPortalClient {
    http: Client,
    base: Url,
}

impl HttpPortalClient {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| PortalError::Validation(format!("bad endpoint {raw}: {e}")))
    }
}

#[async_trait]
impl AuthService for HttpPortalClient {
    async fn login(&self, username: &str, password: &str) -> Result<LoginReply> {
        let res = self
            .http
            .post(self.endpoint("auth/login")?)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let body: LoginResponseBody = check(res, CallKind::Credentials).await?.json().await?;
        interpret_login(body, username)
    }

    async fn verify_second_factor(&self, subject_id: &str, code: &str) -> Result<Identity> {
        let res = self
            .http
            .post(self.endpoint("auth/verify-2fa")?)
            .json(&VerifyRequest {
                user_id: subject_id.to_string(),
                code: code.to_string(),
            })
            .send()
            .await?;
        let body: LoginResponseBody = check(res, CallKind::Credentials).await?.json().await?;
        identity_from_body(body, None, Some(subject_id))
    }

    async fn update_profile(&self, credential: &str, change: &ProfileRequest) -> Result<ProfileResponseBody> {
        let res = self
            .http
            .put(self.endpoint("auth/profile")?)
            .header(header::AUTHORIZATION, bearer(credential))
            .json(change)
            .send()
            .await?;
        Ok(check(res, CallKind::Bearer).await?.json().await?)
    }

    async fn forgot_password(&self, email: &str) -> Result<()> {
        let res = self
            .http
            .post(self.endpoint("auth/forgot-password")?)
            .json(&ForgotPasswordRequest {
                email: email.to_string(),
            })
            .send()
            .await?;
        check(res, CallKind::Public).await?;
        Ok(())
    }

    async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        let mut url = self.endpoint("auth/reset-password")?;
        url.path_segments_mut()
            .map_err(|_| PortalError::Validation("API base URL cannot carry a path".into()))?
            .push(token);
        let res = self
            .http
            .put(url)
            .json(&ResetPasswordRequest {
                password: password.to_string(),
            })
            .send()
            .await?;
        check(res, CallKind::Public).await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryService for HttpPortalClient {
    async fn fetch_stock(&self, credential: &str) -> Result<StockSnapshot> {
        let res = self
            .http
            .get(self.endpoint("autotrader/stock")?)
            .header(header::AUTHORIZATION, bearer(credential))
            .send()
            .await?;
        Ok(check(res, CallKind::Bearer).await?.json().await?)
    }

    async fn fetch_videos(&self, credential: &str) -> Result<Vec<VideoRecord>> {
        let res = self
            .http
            .get(self.endpoint("videos")?)
            .header(header::AUTHORIZATION, bearer(credential))
            .send()
            .await?;
        Ok(check(res, CallKind::Bearer).await?.json().await?)
    }
}

/// Turn the loosely-shaped login body into an explicit variant.
pub fn interpret_login(body: LoginResponseBody, submitted_username: &str) -> Result<LoginReply> {
    if body.require_two_factor == Some(true) {
        let subject_id = body
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PortalError::MalformedResponse("second factor required without a user id".into()))?;
        return Ok(LoginReply::NeedsSecondFactor { subject_id });
    }
    identity_from_body(body, Some(submitted_username), None).map(LoginReply::Success)
}

fn bearer(credential: &str) -> String {
    format!("Bearer {}", credential)
}

fn identity_from_body(
    body: LoginResponseBody,
    fallback_username: Option<&str>,
    fallback_subject: Option<&str>,
) -> Result<Identity> {
    let credential = body
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PortalError::MalformedResponse("no token issued".into()))?;
    let role = body
        .role
        .ok_or_else(|| PortalError::MalformedResponse("no role in response".into()))?;
    let username = body
        .username
        .or_else(|| fallback_username.map(str::to_string))
        .ok_or_else(|| PortalError::MalformedResponse("no username in response".into()))?;
    let subject_id = body
        .user_id
        .or_else(|| fallback_subject.map(str::to_string))
        .unwrap_or_else(|| username.clone());

    Ok(Identity {
        subject_id,
        username,
        role,
        credential,
        email: body.email,
        phone: body.phone,
    })
}

async fn check(res: Response, kind: CallKind) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let message = res
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .filter(|m| !m.trim().is_empty());

    if status.is_server_error() {
        return Err(PortalError::RemoteUnavailable(
            message.unwrap_or_else(|| status.to_string()),
        ));
    }
    Err(match kind {
        CallKind::Credentials => {
            PortalError::InvalidCredentials(message.unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string()))
        }
        CallKind::Bearer if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            PortalError::SessionExpiredOrInvalid
        }
        _ => PortalError::Rejected(message.unwrap_or_else(|| "Request rejected".to_string())),
    })
}
