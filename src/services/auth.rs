use super::api::{ApiClient, ApiError, Credentials};
use crate::models::auth::{LoginRequest, SignInBody, SignUpBody, SignUpRequest, TokenPair};
use crate::models::user::{Role, User};
use crate::models::validation::ValidationErrors;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid form: {0}")]
    Invalid(ValidationErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Invalid(_) => "Please correct the highlighted fields.".to_string(),
            AuthError::Api(ApiError::Unauthorized) => "Invalid credentials".to_string(),
            AuthError::Api(e) => e.user_message(),
        }
    }
}

/// A signed-in operator: the backend tokens plus who they belong to.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub role: Option<Role>,
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(username: &str, role: Option<Role>, tokens: TokenPair, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            role,
            credentials: Credentials::new(tokens),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

/// Session store backed by the backend's `/auth` endpoints. The console
/// never sees passwords beyond forwarding them on sign-in.
pub struct AuthService {
    api: ApiClient,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(api: ApiClient, session_ttl_secs: i64) -> Self {
        Self {
            api,
            sessions: RwLock::new(HashMap::new()),
            session_ttl: Duration::seconds(session_ttl_secs),
        }
    }

    pub async fn sign_in(&self, req: &LoginRequest) -> Result<Arc<Session>, AuthError> {
        req.validate().map_err(AuthError::Invalid)?;

        let identifier = req.identifier.trim();
        let tokens: TokenPair = self
            .api
            .public_post(
                "/auth/signin",
                &SignInBody {
                    identifier,
                    password: &req.password,
                },
            )
            .await?;

        let mut session = Session::new(identifier, None, tokens, self.session_ttl);

        // The profile only decorates the session; sign-in succeeds without it.
        match self.api.get::<User>(&session.credentials, "/auth/me").await {
            Ok(user) => {
                session.username = user.username;
                session.role = Some(user.role);
            }
            Err(e) => warn!("Could not load profile for {}: {}", identifier, e),
        }

        let session = self.insert(session);
        info!("Operator {} signed in", session.username);
        Ok(session)
    }

    pub async fn sign_up(&self, req: &SignUpRequest) -> Result<(), AuthError> {
        req.validate().map_err(AuthError::Invalid)?;
        let _: Value = self
            .api
            .public_post(
                "/auth/signup",
                &SignUpBody {
                    username: req.username.trim(),
                    email: req.email.trim(),
                    password: &req.password,
                },
            )
            .await?;
        info!("Registered new account {}", req.username.trim());
        Ok(())
    }

    /// Looks up a live session. Expired sessions stay in the store until
    /// [`AuthService::purge_expired`] reports them.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().get(id).cloned()?;
        if session.is_expired(Utc::now()) {
            debug!("Session for {} expired", session.username);
            return None;
        }
        Some(session)
    }

    pub fn insert(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    pub async fn sign_out(&self, id: &str) {
        let Some(session) = self.sessions.write().remove(id) else {
            return;
        };
        let tokens = session.credentials.snapshot().await;
        let body = serde_json::json!({ "refresh_token": tokens.refresh_token });
        // Best effort: the local session is gone either way.
        if let Err(e) = self
            .api
            .post::<_, Value>(&session.credentials, "/auth/signout", &body)
            .await
        {
            debug!("Backend sign-out for {} failed: {}", session.username, e);
        }
        info!("Operator {} signed out", session.username);
    }

    /// Drops expired sessions and returns their ids so callers can release
    /// what was cached for them.
    pub fn purge_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{spawn_backend, test_client};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    fn auth_backend() -> Router {
        Router::new()
            .route(
                "/auth/signin",
                post(|Json(body): Json<Value>| async move {
                    if body["password"] == "correct-horse" {
                        (
                            StatusCode::OK,
                            Json(json!({"success": true, "data": {"access_token": "a1", "refresh_token": "r1"}})),
                        )
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad credentials"})))
                    }
                }),
            )
            .route(
                "/auth/me",
                get(|headers: HeaderMap| async move {
                    assert_eq!(headers["authorization"], "Bearer a1");
                    Json(json!({"id": 9, "username": "jdoe", "email": "jdoe@example.com", "role": "admin", "status": "active"}))
                }),
            )
            .route("/auth/signout", post(|| async { Json(json!({"success": true})) }))
    }

    #[tokio::test]
    async fn test_sign_in_creates_session_with_profile() {
        let base = spawn_backend(auth_backend()).await;
        let auth = AuthService::new(test_client(&base), 3600);

        let session = auth
            .sign_in(&LoginRequest {
                identifier: "jdoe@example.com".to_string(),
                password: "correct-horse".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.username, "jdoe");
        assert!(session.is_admin());
        assert!(auth.get(&session.id).is_some());

        auth.sign_out(&session.id).await;
        assert!(auth.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let base = spawn_backend(auth_backend()).await;
        let auth = AuthService::new(test_client(&base), 3600);

        let err = auth
            .sign_in(&LoginRequest {
                identifier: "jdoe".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Invalid credentials");
        assert_eq!(auth.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_invalid_form_never_reaches_backend() {
        let auth = AuthService::new(test_client("http://127.0.0.1:9"), 3600);
        let err = auth.sign_in(&LoginRequest::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_expired_sessions_are_purged() {
        let auth = AuthService::new(test_client("http://127.0.0.1:9"), 3600);
        let tokens = TokenPair {
            access_token: "a".to_string(),
            refresh_token: None,
        };
        let live = auth.insert(Session::new("live", None, tokens.clone(), Duration::hours(1)));
        let dead = auth.insert(Session::new("dead", None, tokens, Duration::seconds(-1)));

        assert!(auth.get(&live.id).is_some());
        assert!(auth.get(&dead.id).is_none());
        assert_eq!(auth.active_sessions(), 2);

        assert_eq!(auth.purge_expired(), vec![dead.id.clone()]);
        assert_eq!(auth.active_sessions(), 1);
    }
}
