//! Role gate for protected views.

use std::sync::Arc;

use crate::models::{Identity, Role};
use crate::session::AuthSessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Session hydration still running: render a placeholder, do not redirect.
    Pending,
    Allowed,
    DeniedRedirectToLogin,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        self == Access::Allowed
    }
}

/// The decision itself. Pure; callers must re-evaluate on every navigation.
pub fn evaluate(required: Option<Role>, identity: Option<&Identity>, session_loading: bool) -> Access {
    if session_loading {
        return Access::Pending;
    }
    let Some(identity) = identity else {
        return Access::DeniedRedirectToLogin;
    };
    match required {
        None => Access::Allowed,
        Some(required) if identity.role.satisfies(required) => Access::Allowed,
        Some(_) => Access::DeniedRedirectToLogin,
    }
}

/// Reads the live session on every check; nothing is cached.
#[derive(Clone)]
pub struct AccessGuard {
    session: Arc<AuthSessionManager>,
}

impl AccessGuard {
    pub fn new(session: Arc<AuthSessionManager>) -> Self {
        Self { session }
    }

    pub fn check(&self, required: Option<Role>) -> Access {
        let access = evaluate(
            required,
            self.session.identity().as_ref(),
            self.session.is_loading(),
        );
        tracing::debug!(?required, ?access, "access check");
        access
    }
}
