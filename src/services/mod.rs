pub mod alerts;
pub mod api;
pub mod auth;
pub mod cache;
pub mod export;
pub mod integrations;
pub mod metrics;
pub mod reports;
pub mod stream;
pub mod systems;
pub mod users;

use api::{ApiClient, ApiError};
use auth::Session;
use cache::{CacheKey, ResponseCache};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One operator's view of the backend: every read goes through the shared
/// cache under the session's scope, every write invalidates what it touched.
/// The per-resource operations live in the sibling modules.
pub struct Backend<'a> {
    api: &'a ApiClient,
    cache: &'a ResponseCache,
    session: &'a Session,
}

impl<'a> Backend<'a> {
    pub fn new(api: &'a ApiClient, cache: &'a ResponseCache, session: &'a Session) -> Self {
        Self { api, cache, session }
    }

    async fn cached(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let key = CacheKey::new(&self.session.id, resource_key(path, query));
        let api = self.api;
        let creds = &self.session.credentials;
        self.cache
            .get_or_fetch(&key, move || api.get_value(creds, path, query))
            .await
    }

    fn invalidate(&self, prefix: &str) {
        self.cache.invalidate(prefix);
    }
}

/// Write responses either echo the stored record or are a bare
/// acknowledgement such as `{"success": true, "message": "..."}`.
fn echoed<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

fn resource_key(path: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let params: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", path, params.join("&"))
}

/// Identifiers come from console URLs; anything outside this alphabet is
/// treated as a missing record instead of being spliced into a backend path.
fn id_segment(id: &str) -> Result<&str, ApiError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(ApiError::NotFound)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::api::ApiClient;
    use super::auth::Session;
    use crate::models::auth::TokenPair;
    use crate::models::config::BackendConfig;
    use axum::Router;

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn spawn_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub fn test_client(base_url: &str) -> ApiClient {
        ApiClient::new(&BackendConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    pub fn test_session(access_token: &str) -> Session {
        Session::new(
            "tester",
            None,
            TokenPair {
                access_token: access_token.to_string(),
                refresh_token: None,
            },
            chrono::Duration::hours(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key("/systems", &[]), "/systems");
        assert_eq!(
            resource_key("/alerts", &[("system_id", "4".to_string())]),
            "/alerts?system_id=4"
        );
    }

    #[test]
    fn test_id_segment() {
        assert!(id_segment("abc-123_X").is_ok());
        assert!(id_segment("../users").is_err());
        assert!(id_segment("").is_err());
    }
}
