//! The authenticated session and the credential renewal protocol.
//!
//! Every request the rest of the crate makes goes through [`SessionManager::send`].
//! When the server rejects the attached credential, the call is parked while one
//! renewal request is made on behalf of every call that was rejected with the same
//! credential, and then replayed exactly once with whatever credential the renewal
//! produced.
//!
//! The session state lives in a [`watch`] channel so that a presentation layer can
//! observe login and logout without polling. Renewal is serialized by a single
//! [`Mutex`]; the credential epoch tells a call that acquired the lock late whether
//! somebody else already renewed the credential it was rejected with.

use crate::endpoints;
use crate::error::ApiError;
use crate::forms::{Credentials, RegisterForm};
use crate::model::User;
use crate::storage::{PROFILE_KEY, ProfileStorage};
use crate::transport::{ApiRequest, ApiResponse, Attempt, Outgoing, Transport};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::instrument;

/// Short-lived bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Long-lived credential used only to obtain a new [`AccessToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    /// The credential is believed stale; the next rejected call renews it.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub access_token: Option<AccessToken>,
    pub current_user: Option<User>,
    pub status: SessionStatus,
}

/// What [`SessionManager::subscribe`] receivers observe.
#[derive(Debug, Default)]
pub struct SessionState {
    session: Session,
    refresh_token: Option<RefreshToken>,
    /// Bumped every time the credential changes hands (login, renewal, logout).
    epoch: u64,
    /// Issue sequence number of the newest store response copied into `current_user`.
    user_seq: u64,
}

impl SessionState {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// What login and renewal responses carry. Registration may return just the user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload {
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl AuthPayload {
    fn from_response(response: &ApiResponse, what: &str) -> Result<Self, ApiError> {
        let payload: AuthPayload = response.decode(what)?;
        if payload.user.is_some() || payload.access_token.is_some() {
            return Ok(payload);
        }
        // `register` answers with the created user record itself.
        match response.decode::<User>(what) {
            Ok(user) => Ok(AuthPayload {
                user: Some(user),
                ..payload
            }),
            Err(_) => Ok(payload),
        }
    }
}

#[derive(Debug)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn ProfileStorage>,
    state: watch::Sender<SessionState>,
    renewal: Mutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn ProfileStorage>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            transport,
            storage,
            state,
            renewal: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().session.clone()
    }

    /// Notified on every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().session.status
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().session.current_user.clone()
    }

    #[instrument(skip(self))]
    pub async fn login(&self, credentials: Credentials) -> Result<User, ApiError> {
        self.set_status(SessionStatus::Authenticating);
        let response = match self.send_unrenewed(endpoints::login(&credentials)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "login rejected");
                self.clear().await;
                return Err(e);
            }
        };
        self.establish(&response, "login response").await
    }

    /// Creates an account and signs in with it.
    ///
    /// When the registration response carries no credential, a login with the same
    /// email and password completes the transition.
    #[instrument(skip(self))]
    pub async fn register(&self, form: RegisterForm) -> Result<User, ApiError> {
        self.set_status(SessionStatus::Authenticating);
        let response = match self.send_unrenewed(endpoints::register(&form)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "registration rejected");
                self.clear().await;
                return Err(e);
            }
        };
        let payload = match AuthPayload::from_response(&response, "registration response") {
            Ok(payload) => payload,
            Err(e) => {
                self.clear().await;
                return Err(e);
            }
        };
        if payload.access_token.is_some() {
            return self.establish(&response, "registration response").await;
        }
        tracing::debug!("registration returned no credential, logging in");
        self.login(form.credentials()).await
    }

    /// Ends the session locally even if the server could not be told.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Err(e) = self.send_unrenewed(endpoints::logout()).await {
            tracing::warn!(error = %e, "server-side logout failed, clearing local session anyway");
        }
        self.clear().await;
        Ok(())
    }

    /// Loads the persisted profile snapshot left by a previous run.
    ///
    /// A restored session has a user but no access token, so its status is
    /// [`SessionStatus::Expired`] and the first rejected call renews the credential.
    #[instrument(skip(self), ret)]
    pub async fn restore(&self) -> eyre::Result<Option<User>> {
        let Some(stored) = self.storage.load(PROFILE_KEY).await? else {
            return Ok(None);
        };
        let user: User = match serde_json::from_str(&stored) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable profile snapshot");
                self.storage.remove(PROFILE_KEY).await?;
                return Ok(None);
            }
        };
        self.state.send_modify(|state| {
            state.session.current_user = Some(user.clone());
            state.session.status = SessionStatus::Expired;
        });
        Ok(Some(user))
    }

    /// Renews the credential now instead of waiting for a rejection.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let epoch = self.state.borrow().epoch;
        self.renew(epoch).await
    }

    /// Sends `request` with the current credential, renewing it once if the server
    /// rejects it.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let (credential, epoch, status) = {
            let state = self.state.borrow();
            (state.session.access_token.clone(), state.epoch, state.session.status)
        };
        let renew = request.renew_on_unauthorized;
        let first = Outgoing {
            request: request.clone(),
            credential,
            attempt: Attempt::First,
        };
        let error = match self.transport.send(first).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        if !renew || !error.is_unauthorized() || status == SessionStatus::Anonymous {
            return Err(error.into());
        }

        tracing::debug!("credential rejected, waiting for renewal");
        self.renew(epoch).await?;

        let replay = Outgoing {
            request,
            credential: self.state.borrow().session.access_token.clone(),
            attempt: Attempt::Retried,
        };
        match self.transport.send(replay).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("renewed credential rejected, ending session");
                self.clear().await;
                Err(ApiError::SessionExpired)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the current user record with the response to store request `seq` and
    /// persists it. Responses to requests issued before the last replacement are ignored.
    pub(crate) async fn replace_current_user(&self, user: User, seq: u64) {
        let mut replaced = false;
        self.state.send_if_modified(|state| {
            if seq < state.user_seq {
                return false;
            }
            match &mut state.session.current_user {
                Some(current) if current.id == user.id => {
                    current.merge(user.clone());
                    state.user_seq = seq;
                    replaced = true;
                    true
                }
                _ => false,
            }
        });
        if replaced {
            self.persist().await;
        }
    }

    /// Renews the credential that was current at `observed` epoch.
    ///
    /// Whoever takes the lock first does the renewal. Everyone queued behind it sees
    /// the epoch moved and takes the outcome without another network call.
    async fn renew(&self, observed: u64) -> Result<(), ApiError> {
        let _renewing = self.renewal.lock().await;
        let refresh_token = {
            let state = self.state.borrow();
            if state.epoch != observed {
                return match state.session.status {
                    SessionStatus::Authenticated => Ok(()),
                    _ => Err(ApiError::SessionExpired),
                };
            }
            state.refresh_token.clone()
        };

        self.set_status(SessionStatus::Expired);
        let request = Outgoing {
            request: endpoints::refresh_token(refresh_token.as_ref()),
            credential: None,
            attempt: Attempt::First,
        };
        let payload = match self.transport.send(request).await {
            Ok(response) => AuthPayload::from_response(&response, "refresh response"),
            Err(e) => Err(ApiError::from(e)),
        };
        match payload {
            Ok(AuthPayload {
                access_token: Some(access_token),
                refresh_token,
                user,
            }) => {
                self.state.send_modify(|state| {
                    state.session.access_token = Some(AccessToken::new(access_token));
                    if let Some(token) = refresh_token {
                        state.refresh_token = Some(RefreshToken::new(token));
                    }
                    if let Some(user) = user {
                        state.session.current_user = Some(user);
                    }
                    state.session.status = SessionStatus::Authenticated;
                    state.epoch += 1;
                });
                tracing::debug!("credential renewed");
                Ok(())
            }
            Ok(_) => {
                tracing::warn!("refresh response carried no access token, ending session");
                self.clear().await;
                Err(ApiError::SessionExpired)
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential renewal failed, ending session");
                self.clear().await;
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn send_unrenewed(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let credential = self.state.borrow().session.access_token.clone();
        self.transport
            .send(Outgoing {
                request: request.without_renewal(),
                credential,
                attempt: Attempt::First,
            })
            .await
            .map_err(ApiError::from)
    }

    async fn establish(&self, response: &ApiResponse, what: &str) -> Result<User, ApiError> {
        let payload = match AuthPayload::from_response(response, what) {
            Ok(AuthPayload { user: Some(user), access_token, refresh_token }) => {
                (user, access_token, refresh_token)
            }
            Ok(_) => {
                self.clear().await;
                return Err(ApiError::Decode(format!("{what}: missing user")));
            }
            Err(e) => {
                self.clear().await;
                return Err(e);
            }
        };
        let (user, access_token, refresh_token) = payload;
        self.state.send_modify(|state| {
            state.session = Session {
                access_token: access_token.map(AccessToken::new),
                current_user: Some(user.clone()),
                status: SessionStatus::Authenticated,
            };
            state.refresh_token = refresh_token.map(RefreshToken::new);
            state.epoch += 1;
        });
        self.persist().await;
        tracing::debug!(user_id = %user.id, username = %user.username, "session established");
        Ok(user)
    }

    /// Forgets the credential, the user and the persisted snapshot.
    async fn clear(&self) {
        self.state.send_modify(|state| {
            state.session = Session::default();
            state.refresh_token = None;
            state.epoch += 1;
        });
        if let Err(e) = self.storage.remove(PROFILE_KEY).await {
            tracing::warn!(error = %e, "failed to remove persisted profile");
        }
    }

    async fn persist(&self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let serialized = match serde_json::to_string(&user) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize profile snapshot");
                return;
            }
        };
        if let Err(e) = self.storage.store(PROFILE_KEY, serialized).await {
            tracing::warn!(error = %e, "failed to persist profile snapshot");
        }
    }

    fn set_status(&self, status: SessionStatus) {
        self.state.send_if_modified(|state| {
            let changed = state.session.status != status;
            state.session.status = status;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mock::MockTransport;
    use crate::storage::MemoryStorage;
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn alice() -> serde_json::Value {
        json!({"_id": "u1", "username": "alice", "fullName": "Alice A", "email": "alice@example.com"})
    }

    fn manager(mock: &MockTransport, storage: &MemoryStorage) -> SessionManager {
        SessionManager::new(Arc::new(mock.clone()), Arc::new(storage.clone()))
    }

    async fn logged_in(mock: &MockTransport, storage: &MemoryStorage, token: &str) -> SessionManager {
        mock.expect_ok(
            Method::POST,
            "/users/login",
            json!({"user": alice(), "accessToken": token, "refreshToken": "r1"}),
        )
        .await;
        let session = manager(mock, storage);
        session
            .login(Credentials::email("alice@example.com", "pw"))
            .await
            .unwrap();
        session
    }

    fn unauthorized() -> Result<ApiResponse, TransportError> {
        Err(TransportError::status(401, "jwt expired"))
    }

    #[tokio::test]
    async fn login_establishes_and_persists_session() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = logged_in(&mock, &storage, "a1").await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Authenticated);
        assert_eq!(snapshot.access_token, Some(AccessToken::new("a1")));
        assert_eq!(snapshot.current_user.unwrap().username, "alice");
        let stored = storage.load(PROFILE_KEY).await.unwrap().unwrap();
        assert!(stored.contains("\"alice\""));
        assert!(!format!("{:?}", session.snapshot()).contains("a1"));
    }

    #[tokio::test]
    async fn login_passes_through_authenticating() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = Arc::new(manager(&mock, &storage));
        let mut rx = session.subscribe();
        assert_eq!(rx.borrow_and_update().session().status, SessionStatus::Anonymous);
        let gate = mock.expect_gated(Method::POST, "/users/login").await;

        let login = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .login(Credentials::email("alice@example.com", "pw"))
                    .await
            }
        });
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().session().status,
            SessionStatus::Authenticating
        );
        mock.wait_for_calls(Method::POST, "/users/login", 1).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Authenticating);
        assert!(session.current_user().is_none());

        gate.release(Ok(ApiResponse::ok(
            json!({"user": alice(), "accessToken": "a1"}),
        )));
        login.await.unwrap().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().session().status,
            SessionStatus::Authenticated
        );
    }

    #[tokio::test]
    async fn failed_login_returns_to_anonymous_with_server_reason() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        mock.expect(
            Method::POST,
            "/users/login",
            Err(TransportError::status(401, "Invalid user credentials")),
        )
        .await;
        let session = manager(&mock, &storage);
        let err = session
            .login(Credentials::username("alice", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Auth("Invalid user credentials".into()));
        assert_eq!(session.status(), SessionStatus::Anonymous);
        // the login endpoint itself never triggers renewal
        assert!(mock.calls_to(Method::POST, "/users/refresh_token").await.is_empty());
    }

    #[tokio::test]
    async fn register_without_token_falls_back_to_login() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        mock.expect_ok(Method::POST, "/users/register", alice()).await;
        mock.expect_ok(
            Method::POST,
            "/users/login",
            json!({"user": alice(), "accessToken": "a1"}),
        )
        .await;
        let session = manager(&mock, &storage);
        let user = session
            .register(RegisterForm {
                full_name: "Alice A".into(),
                email: "alice@example.com".into(),
                username: "alice".into(),
                password: "pw".into(),
                avatar: None,
                cover_image: None,
            })
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(session.status(), SessionStatus::Authenticated);
        let login = mock.calls_to(Method::POST, "/users/login").await;
        assert_eq!(
            login[0].body,
            crate::transport::RequestBody::Json(json!({"email": "alice@example.com", "password": "pw"}))
        );
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = logged_in(&mock, &storage, "a1").await;
        mock.expect(Method::POST, "/users/logout", Err(TransportError::network("down")))
            .await;

        session.logout().await.unwrap();
        assert_eq!(session.snapshot(), Session::default());
        assert_eq!(storage.load(PROFILE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn restore_enters_expired_with_saved_user() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        storage
            .store(PROFILE_KEY, alice().to_string())
            .await
            .unwrap();
        let session = manager(&mock, &storage);
        let user = session.restore().await.unwrap().unwrap();
        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(session.status(), SessionStatus::Expired);
        assert_eq!(session.snapshot().access_token, None);
    }

    #[tokio::test]
    async fn expired_credential_is_renewed_and_request_replayed() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = logged_in(&mock, &storage, "stale").await;

        mock.expect(Method::GET, "/users/current-user", unauthorized()).await;
        mock.expect_ok(
            Method::POST,
            "/users/refresh_token",
            json!({"accessToken": "fresh", "refreshToken": "r2"}),
        )
        .await;
        mock.expect_ok(Method::GET, "/users/current-user", alice()).await;

        let response = session.send(endpoints::current_user()).await.unwrap();
        assert_eq!(response.data, alice());

        let calls = mock.calls_to(Method::GET, "/users/current-user").await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].credential.as_deref(), Some("stale"));
        assert_eq!(calls[0].attempt, Attempt::First);
        assert_eq!(calls[1].credential.as_deref(), Some("fresh"));
        assert_eq!(calls[1].attempt, Attempt::Retried);

        let refresh = mock.calls_to(Method::POST, "/users/refresh_token").await;
        assert_eq!(
            refresh[0].body,
            crate::transport::RequestBody::Json(json!({"refreshToken": "r1"}))
        );
        assert_eq!(session.status(), SessionStatus::Authenticated);
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_renewal() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = Arc::new(logged_in(&mock, &storage, "stale").await);

        mock.handle(Method::GET, "/videos", |outgoing| {
            match outgoing.credential.as_ref().map(AccessToken::secret) {
                Some("fresh") => Ok(ApiResponse::ok(json!([]))),
                _ => Err(TransportError::status(401, "jwt expired")),
            }
        })
        .await;
        let gate = mock.expect_gated(Method::POST, "/users/refresh_token").await;

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.send(ApiRequest::get("/videos")).await })
            })
            .collect();

        mock.wait_for_calls(Method::GET, "/videos", 5).await.unwrap();
        mock.wait_for_calls(Method::POST, "/users/refresh_token", 1)
            .await
            .unwrap();
        gate.release(Ok(ApiResponse::ok(json!({"accessToken": "fresh"}))));

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(
            mock.calls_to(Method::POST, "/users/refresh_token").await.len(),
            1
        );
        let replays = mock
            .calls_to(Method::GET, "/videos")
            .await
            .into_iter()
            .filter(|call| call.attempt == Attempt::Retried)
            .count();
        assert_eq!(replays, 5);
    }

    #[tokio::test]
    async fn failed_renewal_fails_every_waiter() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = Arc::new(logged_in(&mock, &storage, "stale").await);

        mock.handle(Method::GET, "/videos", |_| {
            Err(TransportError::status(401, "jwt expired"))
        })
        .await;
        let gate = mock.expect_gated(Method::POST, "/users/refresh_token").await;

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.send(ApiRequest::get("/videos")).await })
            })
            .collect();
        mock.wait_for_calls(Method::GET, "/videos", 3).await.unwrap();
        mock.wait_for_calls(Method::POST, "/users/refresh_token", 1)
            .await
            .unwrap();
        gate.release(Err(TransportError::status(401, "refresh token expired")));

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap_err(), ApiError::SessionExpired);
        }
        assert_eq!(session.status(), SessionStatus::Anonymous);
        assert_eq!(session.current_user(), None);
        assert_eq!(storage.load(PROFILE_KEY).await.unwrap(), None);
        assert_eq!(
            mock.calls_to(Method::POST, "/users/refresh_token").await.len(),
            1
        );
        // nobody replayed after the failed renewal
        assert_eq!(mock.calls_to(Method::GET, "/videos").await.len(), 3);
    }

    #[tokio::test]
    async fn rejected_replay_does_not_renew_again() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = logged_in(&mock, &storage, "stale").await;

        mock.handle(Method::GET, "/videos", |_| {
            Err(TransportError::status(401, "jwt expired"))
        })
        .await;
        mock.expect_ok(
            Method::POST,
            "/users/refresh_token",
            json!({"accessToken": "fresh"}),
        )
        .await;

        let err = session.send(ApiRequest::get("/videos")).await.unwrap_err();
        assert_eq!(err, ApiError::SessionExpired);
        assert_eq!(session.status(), SessionStatus::Anonymous);
        assert_eq!(
            mock.calls_to(Method::POST, "/users/refresh_token").await.len(),
            1
        );
        assert_eq!(mock.calls_to(Method::GET, "/videos").await.len(), 2);
    }

    #[tokio::test]
    async fn anonymous_rejection_is_reported_without_renewal() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        mock.expect(Method::GET, "/users/current-user", unauthorized()).await;
        let session = manager(&mock, &storage);

        let err = session.send(endpoints::current_user()).await.unwrap_err();
        assert_eq!(err, ApiError::Auth("jwt expired".into()));
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_observe_logout() {
        let mock = MockTransport::new();
        let storage = MemoryStorage::new();
        let session = logged_in(&mock, &storage, "a1").await;
        let mut rx = session.subscribe();
        assert_eq!(rx.borrow().session().status, SessionStatus::Authenticated);

        mock.expect_ok(Method::POST, "/users/logout", json!({})).await;
        session.logout().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().session().status, SessionStatus::Anonymous);
    }
}
