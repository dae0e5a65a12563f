use crate::models::auth::{Claims, RefreshBody, TokenPair};
use crate::models::config::BackendConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not reach the backend: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("session expired, please sign in again")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Backend(String),
    #[error("unexpected response from backend: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Text shown inline next to the failed action.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(e) if e.is_timeout() => "The backend did not respond in time.".to_string(),
            ApiError::Transport(_) => "The backend is unreachable.".to_string(),
            ApiError::Status { message, .. } => message.clone(),
            ApiError::Backend(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// The backend's refresh endpoint, behind a trait so the refresh flow can be
/// exercised without a live auth service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}

struct BackendRefresher {
    http: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl TokenRefresher for BackendRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&RefreshBody { refresh_token })
            .send()
            .await?;
        let value = decode_response(response).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Tokens of one signed-in session. The mutex serializes refreshes so
/// concurrent requests that find the token expired refresh it once.
#[derive(Debug)]
pub struct Credentials {
    tokens: Mutex<TokenPair>,
}

impl Credentials {
    pub fn new(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }

    pub async fn snapshot(&self) -> TokenPair {
        self.tokens.lock().await.clone()
    }
}

/// Expiry of a JWT access token. Opaque tokens have none and are only
/// refreshed after the backend rejects them.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    Utc.timestamp_opt(data.claims.exp, 0).single()
}

/// Strips the `{success, data, message}` envelope. Bodies without `data`
/// are returned as they are.
pub fn unwrap_envelope(value: Value) -> Result<Value, ApiError> {
    match value {
        Value::Object(mut map) => {
            if let Some(Value::Bool(false)) = map.get("success") {
                let message = map
                    .get("message")
                    .or_else(|| map.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("The backend rejected the request.")
                    .to_string();
                return Err(ApiError::Backend(message));
            }
            match map.remove("data") {
                Some(data) => Ok(data),
                None => Ok(Value::Object(map)),
            }
        }
        other => Ok(other),
    }
}

/// Collections arrive as a bare array or wrapped in `items`/`results`.
pub fn decode_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ApiError> {
    let items = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map
            .remove("items")
            .or_else(|| map.remove("results"))
            .unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    Ok(serde_json::from_value(items)?)
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

async fn decode_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::NOT_FOUND => ApiError::NotFound,
            _ => ApiError::Status {
                status: status.as_u16(),
                message: error_message(&body).unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                }),
            },
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    unwrap_envelope(serde_json::from_str(&body)?)
}

/// HTTP client for the backend REST API. Cheap to clone; all clones share
/// one connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    refresh_skew: Duration,
    refresher: Arc<dyn TokenRefresher>,
}

impl ApiClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let refresher = Arc::new(BackendRefresher {
            http: http.clone(),
            base_url: base_url.clone(),
        });
        Ok(Self {
            http,
            base_url,
            refresh_skew: Duration::seconds(config.refresh_skew_secs),
            refresher,
        })
    }

    #[cfg(test)]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Calls an endpoint that needs no session, such as sign-in.
    pub async fn public_post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let value = decode_response(response).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_value(
        &self,
        creds: &Credentials,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        self.send(creds, Method::GET, path, query, None).await
    }

    pub async fn get<T: DeserializeOwned>(&self, creds: &Credentials, path: &str) -> Result<T, ApiError> {
        let value = self.get_value(creds, path, &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post<B, T>(&self, creds: &Credentials, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let value = self.send(creds, Method::POST, path, &[], Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn patch<B, T>(&self, creds: &Credentials, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let value = self.send(creds, Method::PATCH, path, &[], Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete(&self, creds: &Credentials, path: &str) -> Result<(), ApiError> {
        self.send(creds, Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    /// Opens a long-lived `text/event-stream` response. The request timeout
    /// does not apply to the stream body.
    pub async fn open_event_stream(
        &self,
        creds: &Credentials,
        path: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let build = |token: &str| {
            self.http
                .get(self.url(path))
                .bearer_auth(token)
                .header(header::ACCEPT, "text/event-stream")
                .timeout(std::time::Duration::from_secs(60 * 60 * 24))
        };

        let token = self.bearer(creds).await?;
        let mut response = build(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.force_refresh(creds, &token).await?;
            response = build(&token).send().await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
                StatusCode::NOT_FOUND => ApiError::NotFound,
                _ => ApiError::Status {
                    status: status.as_u16(),
                    message: "event stream rejected".to_string(),
                },
            });
        }
        Ok(response)
    }

    async fn send(
        &self,
        creds: &Credentials,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let build = |token: &str| {
            let mut request = self
                .http
                .request(method.clone(), self.url(path))
                .bearer_auth(token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }
            request
        };

        let token = self.bearer(creds).await?;
        debug!("{} {}", method, path);
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return decode_response(response).await;
        }

        info!("Backend rejected access token for {} {}, refreshing", method, path);
        let token = self.force_refresh(creds, &token).await?;
        let response = build(&token).send().await?;
        decode_response(response).await
    }

    /// Current access token, refreshed first when it is within the skew of
    /// its expiry.
    async fn bearer(&self, creds: &Credentials) -> Result<String, ApiError> {
        let mut tokens = creds.tokens.lock().await;
        let expiring = token_expiry(&tokens.access_token)
            .map(|exp| exp - self.refresh_skew <= Utc::now())
            .unwrap_or(false);

        if expiring {
            match tokens.refresh_token.clone() {
                Some(refresh_token) => {
                    debug!("Access token expiring, refreshing ahead of request");
                    *tokens = self.refresh_pair(&refresh_token).await?;
                }
                None => return Err(ApiError::Unauthorized),
            }
        }
        Ok(tokens.access_token.clone())
    }

    /// Refreshes after a 401. When another request already replaced the
    /// rejected token, its result is reused.
    async fn force_refresh(&self, creds: &Credentials, rejected: &str) -> Result<String, ApiError> {
        let mut tokens = creds.tokens.lock().await;
        if tokens.access_token != rejected {
            return Ok(tokens.access_token.clone());
        }
        let refresh_token = tokens.refresh_token.clone().ok_or(ApiError::Unauthorized)?;
        *tokens = self.refresh_pair(&refresh_token).await?;
        Ok(tokens.access_token.clone())
    }

    async fn refresh_pair(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        match self.refresher.refresh(refresh_token).await {
            Ok(mut pair) => {
                // Backends that do not rotate refresh tokens omit them.
                if pair.refresh_token.is_none() {
                    pair.refresh_token = Some(refresh_token.to_string());
                }
                Ok(pair)
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{spawn_backend, test_client};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn jwt(exp: DateTime<Utc>) -> String {
        encode(
            &Header::default(),
            &json!({"sub": "ops", "exp": exp.timestamp()}),
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap()
    }

    fn bearer_of(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim_start_matches("Bearer ")
            .to_string()
    }

    fn guarded_backend(accepted: String) -> Router {
        Router::new().route(
            "/systems",
            get(move |headers: HeaderMap| {
                let accepted = accepted.clone();
                async move {
                    if bearer_of(&headers) == accepted {
                        (
                            axum::http::StatusCode::OK,
                            Json(json!({"success": true, "data": [{"id": 1}]})),
                        )
                    } else {
                        (
                            axum::http::StatusCode::UNAUTHORIZED,
                            Json(json!({"message": "token expired"})),
                        )
                    }
                }
            }),
        )
    }

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(
            unwrap_envelope(json!({"success": true, "data": [1, 2]})).unwrap(),
            json!([1, 2])
        );
        assert_eq!(unwrap_envelope(json!({"id": 3})).unwrap(), json!({"id": 3}));
        match unwrap_envelope(json!({"success": false, "message": "name taken"})) {
            Err(ApiError::Backend(msg)) => assert_eq!(msg, "name taken"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_list_shapes() {
        let bare: Vec<i64> = decode_list(json!([1, 2])).unwrap();
        let wrapped: Vec<i64> = decode_list(json!({"items": [3]})).unwrap();
        let empty: Vec<i64> = decode_list(Value::Null).unwrap();
        assert_eq!(bare, vec![1, 2]);
        assert_eq!(wrapped, vec![3]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_token_expiry() {
        let exp = Utc.timestamp_opt(1_900_000_000, 0).unwrap();
        assert_eq!(token_expiry(&jwt(exp)), Some(exp));
        assert_eq!(token_expiry("opaque-token"), None);

        let issued_for_audience = encode(
            &Header::default(),
            &json!({"sub": "ops", "aud": "infrawatch", "nbf": exp.timestamp(), "exp": exp.timestamp()}),
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap();
        assert_eq!(token_expiry(&issued_for_audience), Some(exp));
    }

    #[tokio::test]
    async fn test_attaches_bearer_and_unwraps() {
        let base = spawn_backend(guarded_backend("good".to_string())).await;
        let client = test_client(&base);
        let creds = Credentials::new(TokenPair {
            access_token: "good".to_string(),
            refresh_token: None,
        });

        let value = client.get_value(&creds, "/systems", &[]).await.unwrap();
        assert_eq!(value, json!([{"id": 1}]));
    }

    #[tokio::test]
    async fn test_refreshes_expired_token_before_request() {
        let fresh = jwt(Utc::now() + Duration::hours(1));
        let base = spawn_backend(guarded_backend(fresh.clone())).await;

        let mut refresher = MockTokenRefresher::new();
        let issued = fresh.clone();
        refresher
            .expect_refresh()
            .withf(|token| token == "r1")
            .times(1)
            .returning(move |_| {
                Ok(TokenPair {
                    access_token: issued.clone(),
                    refresh_token: None,
                })
            });

        let client = test_client(&base).with_refresher(Arc::new(refresher));
        let creds = Credentials::new(TokenPair {
            access_token: jwt(Utc::now() - Duration::minutes(5)),
            refresh_token: Some("r1".to_string()),
        });

        client.get_value(&creds, "/systems", &[]).await.unwrap();
        let tokens = creds.snapshot().await;
        assert_eq!(tokens.access_token, fresh);
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_retries_once_after_unauthorized() {
        let base = spawn_backend(guarded_backend("fresh".to_string())).await;

        let mut refresher = MockTokenRefresher::new();
        refresher.expect_refresh().times(1).returning(|_| {
            Ok(TokenPair {
                access_token: "fresh".to_string(),
                refresh_token: Some("r2".to_string()),
            })
        });

        let client = test_client(&base).with_refresher(Arc::new(refresher));
        let creds = Credentials::new(TokenPair {
            access_token: "stale".to_string(),
            refresh_token: Some("r1".to_string()),
        });

        let value = client.get_value(&creds, "/systems", &[]).await.unwrap();
        assert_eq!(value, json!([{"id": 1}]));
        assert_eq!(creds.snapshot().await.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_unauthorized() {
        let base = spawn_backend(guarded_backend("fresh".to_string())).await;

        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh()
            .returning(|_| Err(ApiError::Backend("refresh token revoked".to_string())));

        let client = test_client(&base).with_refresher(Arc::new(refresher));
        let creds = Credentials::new(TokenPair {
            access_token: "stale".to_string(),
            refresh_token: Some("r1".to_string()),
        });

        let err = client.get_value(&creds, "/systems", &[]).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_status_error_carries_backend_message() {
        let backend = Router::new().route(
            "/systems",
            axum::routing::post(|| async {
                (
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({"detail": "target unreachable"})),
                )
            }),
        );
        let base = spawn_backend(backend).await;
        let client = test_client(&base);
        let creds = Credentials::new(TokenPair {
            access_token: "t".to_string(),
            refresh_token: None,
        });

        let err = client
            .post::<_, Value>(&creds, "/systems", &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "target unreachable");
    }
}
