//! Authentication state machine.
//!
//! ```text
//! Loading ──restore──▶ Unauthenticated ──login──▶ CredentialsSubmitted
//!                             ▲                      │            │
//!                             │              needs 2FA│            │token
//!                             │                      ▼            ▼
//!                             └──restart/logout── AwaitingSecondFactor ──verify──▶ Authenticated
//! ```
//!
//! The manager is the only writer of the session store. The pending challenge lives
//! in memory only; losing it on restart forces the user back to the credential step.
//! Every login attempt gets a number so that a reply for a superseded attempt is
//! dropped instead of overwriting newer state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::client::AuthService;
use crate::error::{PortalError, Result};
use crate::models::{ChallengeStage, Identity, IdentityUpdate, LoginReply, PendingLoginChallenge};
use crate::storage::SessionStore;

pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Startup recovery has not run yet.
    Loading,
    Unauthenticated,
    CredentialsSubmitted,
    AwaitingSecondFactor(PendingLoginChallenge),
    Authenticated(Identity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(Identity),
    NeedsSecondFactor(PendingLoginChallenge),
}

struct Inner {
    state: AuthState,
    attempt: u64,
}

pub struct AuthSessionManager {
    api: Arc<dyn AuthService>,
    store: Arc<dyn SessionStore>,
    inner: RwLock<Inner>,
}

impl AuthSessionManager {
    pub fn new(api: Arc<dyn AuthService>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            api,
            store,
            inner: RwLock::new(Inner {
                state: AuthState::Loading,
                attempt: 0,
            }),
        }
    }

    /// Convenience for callers that want hydration done up front.
    pub fn restored(api: Arc<dyn AuthService>, store: Arc<dyn SessionStore>) -> Self {
        let manager = Self::new(api, store);
        manager.restore();
        manager
    }

    pub fn api(&self) -> &Arc<dyn AuthService> {
        &self.api
    }

    /// Hydrate from durable storage. Absent or unreadable records yield
    /// `Unauthenticated`. No-op if a login or logout already moved the state on.
    pub fn restore(&self) {
        let loaded = match self.store.load() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "session store unreadable, starting signed out");
                None
            }
        };
        let mut inner = self.write();
        if inner.state != AuthState::Loading {
            return;
        }
        inner.state = match loaded {
            Some(identity) => {
                info!(username = %identity.username, role = %identity.role, "session restored");
                AuthState::Authenticated(identity)
            }
            None => AuthState::Unauthenticated,
        };
    }

    pub fn state(&self) -> AuthState {
        self.read().state.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.read().state == AuthState::Loading
    }

    pub fn identity(&self) -> Option<Identity> {
        match &self.read().state {
            AuthState::Authenticated(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn credential(&self) -> Option<String> {
        match &self.read().state {
            AuthState::Authenticated(identity) => Some(identity.credential.clone()),
            _ => None,
        }
    }

    pub fn pending_challenge(&self) -> Option<PendingLoginChallenge> {
        match &self.read().state {
            AuthState::AwaitingSecondFactor(challenge) => Some(challenge.clone()),
            _ => None,
        }
    }

    /// Submit credentials. Discards any pending challenge before the request goes out.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(PortalError::Validation(
                "Username and password are required".into(),
            ));
        }

        let attempt = {
            let mut inner = self.write();
            if matches!(inner.state, AuthState::Authenticated(_)) {
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "failed to clear previous session before login");
                }
            }
            inner.attempt += 1;
            inner.state = AuthState::CredentialsSubmitted;
            inner.attempt
        };
        debug!(attempt, "credentials submitted");

        let reply = self.api.login(username, password).await;

        let mut inner = self.write();
        if inner.attempt != attempt || inner.state != AuthState::CredentialsSubmitted {
            debug!(attempt, "dropping reply for superseded login attempt");
            return Err(PortalError::InvalidState("login superseded by a newer attempt"));
        }

        match reply {
            Ok(LoginReply::Success(identity)) => {
                if let Err(e) = self.store.save(&identity) {
                    inner.state = AuthState::Unauthenticated;
                    return Err(e);
                }
                info!(username = %identity.username, role = %identity.role, "signed in");
                inner.state = AuthState::Authenticated(identity.clone());
                Ok(LoginOutcome::Authenticated(identity))
            }
            Ok(LoginReply::NeedsSecondFactor { subject_id }) => {
                let challenge = PendingLoginChallenge {
                    subject_id,
                    stage: ChallengeStage::AwaitingCode,
                    attempts: 0,
                };
                info!(subject_id = %challenge.subject_id, "second factor required");
                inner.state = AuthState::AwaitingSecondFactor(challenge.clone());
                Ok(LoginOutcome::NeedsSecondFactor(challenge))
            }
            Err(e) => {
                info!(error = %e, "login rejected");
                inner.state = AuthState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Complete a pending challenge. Failures leave the challenge in place so the
    /// user can resubmit as often as the server allows.
    pub async fn verify_second_factor(&self, code: &str) -> Result<Identity> {
        let (attempt, subject_id) = {
            let inner = self.read();
            match &inner.state {
                AuthState::AwaitingSecondFactor(challenge) => {
                    (inner.attempt, challenge.subject_id.clone())
                }
                _ => {
                    return Err(PortalError::InvalidState(
                        "no second-factor challenge is pending",
                    ))
                }
            }
        };
        if !is_valid_code(code) {
            return Err(PortalError::Validation(format!(
                "Verification code must be {CODE_LENGTH} digits"
            )));
        }

        let result = self.api.verify_second_factor(&subject_id, code).await;

        let mut inner = self.write();
        let current = inner.attempt == attempt
            && matches!(&inner.state, AuthState::AwaitingSecondFactor(c) if c.subject_id == subject_id);
        if !current {
            debug!(attempt, "dropping verification reply for discarded challenge");
            return Err(PortalError::InvalidState("login challenge was discarded"));
        }

        match result {
            Ok(identity) => {
                self.store.save(&identity)?;
                info!(username = %identity.username, role = %identity.role, "second factor accepted");
                inner.state = AuthState::Authenticated(identity.clone());
                Ok(identity)
            }
            Err(e) => {
                if let AuthState::AwaitingSecondFactor(challenge) = &mut inner.state {
                    challenge.attempts += 1;
                }
                Err(e)
            }
        }
    }

    /// Abandon a login in progress and return to the credential step.
    pub fn restart_login(&self) {
        let mut inner = self.write();
        if matches!(
            inner.state,
            AuthState::AwaitingSecondFactor(_) | AuthState::CredentialsSubmitted
        ) {
            inner.attempt += 1;
            inner.state = AuthState::Unauthenticated;
            debug!("login restarted");
        }
    }

    /// Always legal. The state becomes `Unauthenticated` even if clearing the store fails.
    pub fn logout(&self) -> Result<()> {
        let mut inner = self.write();
        inner.attempt += 1;
        inner.state = AuthState::Unauthenticated;
        info!("signed out");
        self.store.clear()
    }

    /// Forced logout after the remote refused `credential`. Returns false and leaves the
    /// session alone when it no longer holds that credential (logout or re-login since).
    pub fn invalidate(&self, credential: &str) -> bool {
        let mut inner = self.write();
        if !holds_credential(&inner.state, credential) {
            debug!("ignoring rejection of a credential no longer in use");
            return false;
        }
        warn!("credential rejected by remote, dropping session");
        inner.attempt += 1;
        inner.state = AuthState::Unauthenticated;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear session store");
        }
        true
    }

    /// Route the result of a call made with `credential` through the session:
    /// an auth failure ends the session if that credential is still current.
    pub fn observe<T>(&self, credential: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_auth_failure() {
                self.invalidate(credential);
            }
        }
        result
    }

    /// Merge caller-confirmed changes into the identity and re-persist.
    /// Only supplied fields are written; nothing is sent to the remote.
    pub fn update_identity(&self, update: IdentityUpdate) -> Result<Identity> {
        self.merge_identity(None, update)
    }

    /// Like `update_identity`, but only while the session still holds `credential`,
    /// the one the confirming request was made with.
    pub fn update_identity_for(&self, credential: &str, update: IdentityUpdate) -> Result<Identity> {
        self.merge_identity(Some(credential), update)
    }

    fn merge_identity(&self, expected: Option<&str>, update: IdentityUpdate) -> Result<Identity> {
        let mut inner = self.write();
        let AuthState::Authenticated(current) = &inner.state else {
            return Err(PortalError::InvalidState("not signed in"));
        };
        if expected.is_some_and(|credential| credential != current.credential) {
            debug!("dropping identity update for a session that has ended");
            return Err(PortalError::InvalidState("session changed while the request was in flight"));
        }
        if update.is_empty() {
            return Ok(current.clone());
        }
        let mut merged = current.clone();
        update.apply_to(&mut merged);
        self.store.save(&merged)?;
        inner.state = AuthState::Authenticated(merged.clone());
        Ok(merged)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn holds_credential(state: &AuthState, credential: &str) -> bool {
    matches!(state, AuthState::Authenticated(identity) if identity.credential == credential)
}

fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ProfileRequest, ProfileResponseBody, Role};
    use crate::storage::MemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Scripted stand-in for the remote auth API.
    #[derive(Default)]
    pub(crate) struct FakeAuth {
        pub verify_gate: Option<Arc<Notify>>,
        pub calls: AtomicUsize,
    }

    pub(crate) fn identity_for(username: &str, role: Role) -> Identity {
        Identity {
            subject_id: format!("id-{username}"),
            username: username.to_string(),
            role,
            credential: format!("token-{username}"),
            email: None,
            phone: None,
        }
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn login(&self, username: &str, password: &str) -> Result<LoginReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match (username, password) {
                ("admin1", "admin-pass") => Ok(LoginReply::Success(identity_for("admin1", Role::Admin))),
                ("staff1", "staff-pass") => Ok(LoginReply::Success(identity_for("staff1", Role::Staff))),
                ("staff2fa", "staff-pass") => Ok(LoginReply::NeedsSecondFactor {
                    subject_id: "id-staff2fa".into(),
                }),
                ("locked", _) => Err(PortalError::InvalidCredentials("Account locked".into())),
                _ => Err(PortalError::InvalidCredentials("Invalid credentials".into())),
            }
        }

        async fn verify_second_factor(&self, subject_id: &str, code: &str) -> Result<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.verify_gate {
                gate.notified().await;
            }
            if subject_id == "id-staff2fa" && code == "123456" {
                Ok(identity_for("staff2fa", Role::Staff))
            } else {
                Err(PortalError::InvalidCredentials("Invalid code".into()))
            }
        }

        async fn update_profile(&self, _credential: &str, _change: &ProfileRequest) -> Result<ProfileResponseBody> {
            Err(PortalError::SessionExpiredOrInvalid)
        }

        async fn forgot_password(&self, _email: &str) -> Result<()> {
            Ok(())
        }

        async fn reset_password(&self, _token: &str, _password: &str) -> Result<()> {
            Ok(())
        }
    }

    fn manager_with(api: FakeAuth) -> (AuthSessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = AuthSessionManager::restored(Arc::new(api), store.clone());
        (manager, store)
    }

    #[tokio::test]
    async fn test_direct_login_persists_identity() {
        let (manager, store) = manager_with(FakeAuth::default());
        let outcome = manager.login("admin1", "admin-pass").await.unwrap();

        assert!(matches!(outcome, LoginOutcome::Authenticated(ref id) if id.role == Role::Admin));
        assert_eq!(manager.credential().as_deref(), Some("token-admin1"));
        assert_eq!(store.load().unwrap().map(|i| i.username), Some("admin1".to_string()));
    }

    #[tokio::test]
    async fn test_second_factor_account_never_authenticates_directly() {
        let (manager, store) = manager_with(FakeAuth::default());
        let outcome = manager.login("staff2fa", "staff-pass").await.unwrap();

        assert!(matches!(outcome, LoginOutcome::NeedsSecondFactor(_)));
        assert!(manager.identity().is_none());
        assert_eq!(store.load().unwrap(), None, "challenge must not touch durable storage");
        let challenge = manager.pending_challenge().unwrap();
        assert_eq!(challenge.subject_id, "id-staff2fa");
        assert_eq!(challenge.stage, ChallengeStage::AwaitingCode);
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_challenge_then_correct_code_signs_in() {
        let (manager, store) = manager_with(FakeAuth::default());
        manager.login("staff2fa", "staff-pass").await.unwrap();

        for _ in 0..3 {
            let err = manager.verify_second_factor("000000").await.unwrap_err();
            assert!(matches!(err, PortalError::InvalidCredentials(_)));
        }
        assert_eq!(manager.pending_challenge().unwrap().attempts, 3);

        let identity = manager.verify_second_factor("123456").await.unwrap();
        assert_eq!(identity.username, "staff2fa");
        assert_eq!(store.load().unwrap(), Some(identity));
    }

    #[tokio::test]
    async fn test_malformed_code_is_rejected_locally() {
        let api = FakeAuth::default();
        let (manager, _) = manager_with(api);
        manager.login("staff2fa", "staff-pass").await.unwrap();

        for code in ["12345", "1234567", "12a456", ""] {
            let err = manager.verify_second_factor(code).await.unwrap_err();
            assert!(matches!(err, PortalError::Validation(_)), "{code}");
        }
        assert!(manager.pending_challenge().is_some());
    }

    #[tokio::test]
    async fn test_verify_without_challenge_is_invalid_state() {
        let (manager, _) = manager_with(FakeAuth::default());
        let err = manager.verify_second_factor("123456").await.unwrap_err();
        assert!(matches!(err, PortalError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_failed_login_stays_unauthenticated_with_message() {
        let (manager, _) = manager_with(FakeAuth::default());
        let err = manager.login("staff1", "wrong").await.unwrap_err();

        assert!(!err.to_string().is_empty());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_empty_fields_never_reach_remote() {
        let api = Arc::new(FakeAuth::default());
        let manager = AuthSessionManager::restored(api.clone(), Arc::new(MemorySessionStore::new()));

        assert!(matches!(manager.login("", "pw").await, Err(PortalError::Validation(_))));
        assert!(matches!(manager.login("staff1", "").await, Err(PortalError::Validation(_))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_discards_challenge() {
        let (manager, _) = manager_with(FakeAuth::default());
        manager.login("staff2fa", "staff-pass").await.unwrap();
        manager.restart_login();

        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert!(matches!(
            manager.verify_second_factor("123456").await,
            Err(PortalError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_new_login_supersedes_in_flight_verification() {
        let gate = Arc::new(Notify::new());
        let api = FakeAuth {
            verify_gate: Some(gate.clone()),
            ..Default::default()
        };
        let (manager, store) = manager_with(api);
        manager.login("staff2fa", "staff-pass").await.unwrap();

        let verify = manager.verify_second_factor("123456");
        let relogin = async {
            tokio::task::yield_now().await;
            let outcome = manager.login("staff1", "staff-pass").await;
            gate.notify_one();
            outcome
        };
        let (verified, relogged) = tokio::join!(verify, relogin);

        assert!(matches!(verified, Err(PortalError::InvalidState(_))));
        assert!(matches!(relogged, Ok(LoginOutcome::Authenticated(_))));
        assert_eq!(manager.identity().unwrap().username, "staff1");
        assert_eq!(store.load().unwrap().unwrap().username, "staff1");
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (manager, store) = manager_with(FakeAuth::default());
        manager.logout().unwrap();
        manager.logout().unwrap();
        assert_eq!(manager.state(), AuthState::Unauthenticated);

        manager.login("staff1", "staff-pass").await.unwrap();
        manager.logout().unwrap();
        assert!(manager.identity().is_none());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_startup_recovery() {
        let store = Arc::new(MemorySessionStore::new());
        store.save(&identity_for("staff1", Role::Staff)).unwrap();
        let manager = AuthSessionManager::new(Arc::new(FakeAuth::default()), store);
        assert!(manager.is_loading());
        manager.restore();
        assert_eq!(manager.identity().unwrap().username, "staff1");

        let corrupted = Arc::new(MemorySessionStore::with_raw("{{{"));
        let manager = AuthSessionManager::restored(Arc::new(FakeAuth::default()), corrupted);
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_update_identity_merges_supplied_fields_only() {
        let (manager, store) = manager_with(FakeAuth::default());
        assert!(matches!(
            manager.update_identity(IdentityUpdate::default()),
            Err(PortalError::InvalidState(_))
        ));

        manager.login("staff1", "staff-pass").await.unwrap();
        let updated = manager
            .update_identity(IdentityUpdate {
                email: Some("staff1@dealer.example".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(updated.username, "staff1");
        assert_eq!(updated.credential, "token-staff1");
        assert_eq!(updated.email.as_deref(), Some("staff1@dealer.example"));
        assert_eq!(store.load().unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_observe_auth_failure_forces_logout() {
        let (manager, store) = manager_with(FakeAuth::default());
        manager.login("admin1", "admin-pass").await.unwrap();

        let result: Result<()> = manager.observe("token-admin1", Err(PortalError::SessionExpiredOrInvalid));
        assert!(result.is_err());
        assert!(manager.identity().is_none());
        assert_eq!(store.load().unwrap(), None);

        manager.login("admin1", "admin-pass").await.unwrap();
        let _ = manager.observe::<()>("token-admin1", Err(PortalError::RemoteUnavailable("down".into())));
        assert!(manager.identity().is_some());
    }

    #[tokio::test]
    async fn test_stale_credential_cannot_touch_newer_session() {
        let (manager, store) = manager_with(FakeAuth::default());
        manager.login("staff1", "staff-pass").await.unwrap();
        let old = manager.credential().unwrap();
        manager.logout().unwrap();
        manager.login("admin1", "admin-pass").await.unwrap();

        let result: Result<()> = manager.observe(&old, Err(PortalError::SessionExpiredOrInvalid));
        assert!(result.is_err());
        assert!(!manager.invalidate(&old));
        assert_eq!(manager.identity().unwrap().username, "admin1");

        let rename = IdentityUpdate {
            username: Some("staff-renamed".into()),
            credential: Some("token-staff1-renamed".into()),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_identity_for(&old, rename.clone()),
            Err(PortalError::InvalidState(_))
        ));
        let stored = store.load().unwrap().unwrap();
        assert_eq!((stored.username.as_str(), stored.credential.as_str()), ("admin1", "token-admin1"));

        let renamed = manager.update_identity_for("token-admin1", rename).unwrap();
        assert_eq!(renamed.username, "staff-renamed");
    }
}
