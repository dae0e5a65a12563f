mod api;
mod pages;
mod stream;

use crate::models::config::AppConfig;
use crate::services::api::{ApiClient, ApiError};
use crate::services::auth::{AuthService, Session};
use crate::services::cache::ResponseCache;
use crate::services::Backend;
use askama::Template;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::{Cookie, CookieManagerLayer, Cookies};
use tower_http::{compression::CompressionLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

/// Paths reachable without a session. Entries ending in `/` match as
/// prefixes.
const PUBLIC_PATHS: &[&str] = &["/login", "/signup", "/static/", "/healthz"];

// State
#[derive(Clone)]
pub struct AppState {
    pub api: ApiClient,
    pub auth: Arc<AuthService>,
    pub cache: Arc<ResponseCache>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config.backend)?;
        Ok(Self::with_client(api, config))
    }

    pub fn with_client(api: ApiClient, config: AppConfig) -> Self {
        Self {
            auth: Arc::new(AuthService::new(api.clone(), config.session.timeout_secs)),
            cache: Arc::new(ResponseCache::new(Duration::from_secs(config.cache.ttl_secs))),
            api,
            config: Arc::new(config),
        }
    }

    pub(crate) fn backend<'a>(&'a self, session: &'a Session) -> Backend<'a> {
        Backend::new(&self.api, &self.cache, session)
    }

    /// Drops expired sessions and the cache entries scoped to them. Returns
    /// how many sessions were removed.
    pub async fn sweep_expired(&self) -> usize {
        let expired = self.auth.purge_expired();
        for session_id in &expired {
            self.cache.clear_scope(session_id).await;
        }
        expired.len()
    }

    /// Ends a session locally and at the backend and releases its cache
    /// entries.
    pub(crate) async fn end_session(&self, cookies: &Cookies, session_id: &str) {
        self.auth.sign_out(session_id).await;
        self.cache.clear_scope(session_id).await;
        cookies.remove(
            Cookie::build((self.config.session.cookie_name.clone(), ""))
                .path("/")
                .build(),
        );
    }
}

pub fn create_app(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        .route("/", get(pages::root))
        .route("/healthz", get(healthz))
        .route("/login", get(pages::login_page).post(pages::login_handler))
        .route("/signup", get(pages::signup_page).post(pages::signup_handler))
        .route("/logout", get(pages::logout_handler).post(pages::logout_handler))
        .route("/dashboard", get(pages::dashboard_page))
        .route("/systems", get(pages::systems_page))
        .route("/systems/new", get(pages::new_system_page).post(pages::create_system_handler))
        .route("/systems/export.csv", get(api::export_systems_csv))
        .route(
            "/systems/:id/edit",
            get(pages::edit_system_page).post(pages::update_system_handler),
        )
        .route("/systems/:id/delete", post(pages::delete_system_handler))
        .route("/alerts", get(pages::alerts_page))
        .route(
            "/integrations",
            get(pages::integrations_page).post(pages::create_integration_handler),
        )
        .route("/users", get(pages::users_page))
        .route("/users/new", get(pages::new_user_page).post(pages::create_user_handler))
        .route(
            "/users/:id/edit",
            get(pages::edit_user_page).post(pages::update_user_handler),
        )
        .route("/users/:id/block", post(pages::block_user_handler))
        .route("/users/:id/unblock", post(pages::unblock_user_handler))
        .route("/users/:id/delete", post(pages::delete_user_handler))
        .route("/reports", get(pages::reports_page))
        .route("/reports/export.csv", get(api::export_report_csv))
        .route("/reports/export.pdf", get(api::export_report_pdf))
        .route("/map", get(pages::map_page))
        .route("/api/summary", get(api::summary))
        .route("/api/systems", get(api::systems))
        .route("/api/map/markers", get(api::map_markers))
        .route("/stream/systems", get(stream::system_stream))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CookieManagerLayer::new())
        .with_state(state)
}

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| {
        if p.ends_with('/') {
            path.starts_with(p)
        } else {
            path == *p
        }
    })
}

/// Resolves the session cookie for every non-public path and hands the
/// session to handlers as a request extension. A handler that hits an
/// expired backend session answers with [`SessionExpired`]; the session is
/// torn down here once the response comes back.
async fn require_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let session = cookies
        .get(&state.config.session.cookie_name)
        .and_then(|c| state.auth.get(c.value()));
    let Some(session) = session else {
        return Redirect::to("/login").into_response();
    };

    let session_id = session.id.clone();
    req.extensions_mut().insert(session);
    let response = next.run(req).await;

    if response.extensions().get::<SessionExpired>().is_some() {
        info!("Backend rejected session {}, signing out", session_id);
        state.end_session(&cookies, &session_id).await;
    }
    response
}

/// Marker response for a backend session that can no longer be refreshed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionExpired {
    json: bool,
}

impl SessionExpired {
    pub(crate) fn page() -> Self {
        Self { json: false }
    }

    pub(crate) fn json() -> Self {
        Self { json: true }
    }
}

impl IntoResponse for SessionExpired {
    fn into_response(self) -> Response {
        let mut response = if self.json {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": ApiError::Unauthorized.to_string() })),
            )
                .into_response()
        } else {
            Redirect::to("/login").into_response()
        };
        response.extensions_mut().insert(self);
        response
    }
}

/// Splits backend failures into the one that ends the session and the ones
/// a page shows inline.
pub(crate) trait Inline<T> {
    fn inline(self) -> Result<Result<T, String>, SessionExpired>;
}

impl<T> Inline<T> for Result<T, ApiError> {
    fn inline(self) -> Result<Result<T, String>, SessionExpired> {
        match self {
            Ok(value) => Ok(Ok(value)),
            Err(ApiError::Unauthorized) => Err(SessionExpired::page()),
            Err(e) => Ok(Err(e.user_message())),
        }
    }
}

pub(crate) fn render<T: Template>(template: &T) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.auth.active_sessions(),
        "cache_entries": state.cache.len(),
    }))
}
