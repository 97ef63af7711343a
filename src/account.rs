//! Account maintenance: profile changes and password recovery.
//!
//! Input is validated locally first; a `Validation` error means no request was sent.

use tracing::info;

use crate::client::AuthService;
use crate::error::{PortalError, Result};
use crate::models::{Identity, ProfileRequest};
use crate::session::AuthSessionManager;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChange {
    pub current_password: String,
    pub username: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

fn validate_new_password(password: &str, confirm: Option<&str>) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PortalError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if confirm != Some(password) {
        return Err(PortalError::Validation("Passwords do not match".into()));
    }
    Ok(())
}

impl ProfileChange {
    fn validate(&self) -> Result<ProfileRequest> {
        if self.current_password.is_empty() {
            return Err(PortalError::Validation("Current password is required".into()));
        }
        let username = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        if let Some(password) = self.new_password.as_deref() {
            validate_new_password(password, self.confirm_password.as_deref())?;
        }
        if username.is_none() && self.new_password.is_none() {
            return Err(PortalError::Validation("Nothing to update".into()));
        }
        Ok(ProfileRequest {
            current_password: self.current_password.clone(),
            username,
            new_password: self.new_password.clone(),
        })
    }
}

/// Apply a profile change server-side, then merge what the server confirmed into the
/// local identity. A refused credential ends the session. If the user signed out or
/// another user signed in meanwhile, the reply is dropped with `InvalidState`.
pub async fn change_profile(session: &AuthSessionManager, change: &ProfileChange) -> Result<Identity> {
    let request = change.validate()?;
    let credential = session
        .credential()
        .ok_or(PortalError::InvalidState("not signed in"))?;

    let reply = session.observe(
        &credential,
        session.api().update_profile(&credential, &request).await,
    )?;
    let identity = session.update_identity_for(&credential, reply.into_update())?;
    info!(username = %identity.username, "profile updated");
    Ok(identity)
}

pub async fn request_password_reset(api: &dyn AuthService, email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(PortalError::Validation("A valid email address is required".into()));
    }
    api.forgot_password(email).await
}

pub async fn reset_password(api: &dyn AuthService, token: &str, password: &str, confirm: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(PortalError::Validation("Reset token is missing".into()));
    }
    validate_new_password(password, Some(confirm))?;
    api.reset_password(token.trim(), password).await
}
