use super::pages::report_window;
use super::{AppState, SessionExpired};
use crate::models::report::ReportQuery;
use crate::models::system::SystemStatus;
use crate::services::api::ApiError;
use crate::services::auth::Session;
use crate::services::export::{self, ExportError};
use crate::services::metrics;
use crate::utils::listing::filter_systems;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

fn api_error(e: ApiError) -> Response {
    let status = match &e {
        ApiError::Unauthorized => return SessionExpired::json().into_response(),
        ApiError::NotFound => StatusCode::NOT_FOUND,
        ApiError::Transport(t) if t.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    warn!("API request failed: {}", e);
    (status, Json(json!({ "error": e.user_message() }))).into_response()
}

/// Download failures are answered as plain text; an expired backend
/// session goes back to the sign-in page like any page would.
fn download_error(e: ApiError) -> Response {
    match e {
        ApiError::Unauthorized => SessionExpired::page().into_response(),
        other => (StatusCode::BAD_GATEWAY, other.user_message()).into_response(),
    }
}

fn export_failed(e: ExportError) -> Response {
    error!("Export failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Export failed").into_response()
}

fn attachment(content_type: &'static str, filename: String, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

pub async fn summary(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Response {
    let backend = state.backend(&session);
    let (systems, alerts) = tokio::join!(backend.list_systems(), backend.list_alerts(None));
    let systems = match systems {
        Ok(systems) => systems,
        Err(e) => return api_error(e),
    };
    let alerts = match alerts {
        Ok(alerts) => alerts,
        Err(e) => return api_error(e),
    };
    Json(metrics::dashboard_summary(&systems, &alerts, Utc::now())).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SystemsQuery {
    status: String,
    q: String,
}

pub async fn systems(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<SystemsQuery>,
) -> Response {
    match state.backend(&session).list_systems().await {
        Ok(systems) => {
            let status = query.status.parse::<SystemStatus>().ok();
            Json(filter_systems(systems, status, &query.q)).into_response()
        }
        Err(e) => api_error(e),
    }
}

pub async fn map_markers(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Response {
    match state.backend(&session).list_systems().await {
        Ok(systems) => Json(metrics::map_markers(&systems)).into_response(),
        Err(e) => api_error(e),
    }
}

pub async fn export_systems_csv(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Response {
    let systems = match state.backend(&session).list_systems().await {
        Ok(systems) => systems,
        Err(e) => return download_error(e),
    };
    match export::systems_csv(&systems) {
        Ok(body) => attachment(
            "text/csv; charset=utf-8",
            export::export_filename("systems", "csv", Utc::now()),
            body,
        ),
        Err(e) => export_failed(e),
    }
}

pub async fn export_report_csv(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let query = report_window(&state, &query);
    let report = match state.backend(&session).fetch_report(&query).await {
        Ok(report) => report,
        Err(e) => return download_error(e),
    };
    match export::report_csv(&metrics::report_rows(&report)) {
        Ok(body) => attachment(
            "text/csv; charset=utf-8",
            export::export_filename("report", "csv", Utc::now()),
            body,
        ),
        Err(e) => export_failed(e),
    }
}

pub async fn export_report_pdf(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let query = report_window(&state, &query);
    let report = match state.backend(&session).fetch_report(&query).await {
        Ok(report) => report,
        Err(e) => return download_error(e),
    };

    let period = match (query.from, query.to) {
        (Some(from), Some(to)) => format!("{} to {}", from, to),
        _ => String::new(),
    };
    let now = Utc::now();
    let pdf = export::report_pdf(
        "InfraWatch Availability Report",
        &period,
        now,
        &metrics::report_rollup(&report),
        &metrics::report_rows(&report),
    );
    match pdf {
        Ok(body) => attachment(
            "application/pdf",
            export::export_filename("report", "pdf", now),
            body,
        ),
        Err(e) => export_failed(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::handlers::create_app;
    use crate::handlers::test_support::*;
    use crate::services::test_support::spawn_backend;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn systems_backend() -> Router {
        Router::new()
            .route(
                "/systems",
                get(|| async {
                    Json(json!({"success": true, "data": [
                        {"id": 1, "name": "web", "connection_type": "api", "status": "up", "lat": 52.1, "lng": 4.3},
                        {"id": 2, "name": "db", "connection_type": "ping", "status": "down", "criticality_level": "critical"},
                        {"id": 3, "name": "queue", "connection_type": "snmp", "status": "maintenance"}
                    ]}))
                }),
            )
            .route("/alerts", get(|| async { Json(json!([])) }))
            .route(
                "/reports",
                get(|| async {
                    Json(json!([{"system_id": 1, "name": "web", "availability": 99.9, "sla_target": 99.5}]))
                }),
            )
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let base = spawn_backend(systems_backend()).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state)
            .oneshot(get_with_cookie("/api/summary", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(summary["total"], 3);
        assert_eq!(summary["down"], 1);
        assert_eq!(summary["critical_down"], json!(["db"]));
    }

    #[tokio::test]
    async fn test_systems_filter_and_markers() {
        let base = spawn_backend(systems_backend()).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state.clone())
            .oneshot(get_with_cookie("/api/systems?status=down", &cookie))
            .await
            .unwrap();
        let systems: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(systems.as_array().unwrap().len(), 1);
        assert_eq!(systems[0]["name"], "db");

        let response = create_app(state)
            .oneshot(get_with_cookie("/api/map/markers", &cookie))
            .await
            .unwrap();
        let markers: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(markers.as_array().unwrap().len(), 1);
        assert_eq!(markers[0]["color"], "#22c55e");
    }

    #[tokio::test]
    async fn test_expired_session_gets_json_401() {
        let backend = Router::new().route(
            "/systems",
            get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "expired"}))) }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state.clone())
            .oneshot(get_with_cookie("/api/systems", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.auth.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_report_downloads() {
        let base = spawn_backend(systems_backend()).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state.clone())
            .oneshot(get_with_cookie("/reports/export.csv?from=2026-10-01&to=2026-10-07", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"infrawatch-report-"));
        assert!(disposition.ends_with(".csv\""));
        let csv = body_text(response).await;
        assert!(csv.starts_with("System ID,Name"));
        assert!(csv.contains("web,99.90,99.50,yes"));

        let response = create_app(state)
            .oneshot(get_with_cookie("/reports/export.pdf", &cookie))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert!(body_text(response).await.starts_with("%PDF-"));
    }

    #[tokio::test]
    async fn test_systems_csv_download() {
        let base = spawn_backend(systems_backend()).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state)
            .oneshot(get_with_cookie("/systems/export.csv", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let csv = body_text(response).await;
        assert_eq!(csv.lines().count(), 4);
    }
}
