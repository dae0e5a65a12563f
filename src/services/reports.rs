use super::api::ApiError;
use super::metrics::normalize_report;
use super::Backend;
use crate::models::report::{Report, ReportQuery};

impl Backend<'_> {
    /// Fetches the backend's report for a resolved window and normalizes
    /// whatever shape it arrives in.
    pub async fn fetch_report(&self, query: &ReportQuery) -> Result<Report, ApiError> {
        let params = query.to_params();
        let payload = self.cached("/reports", &params).await?;
        Ok(normalize_report(&payload))
    }
}

#[cfg(test)]
mod tests {
    use crate::models::report::ReportQuery;
    use crate::services::cache::ResponseCache;
    use crate::services::test_support::{spawn_backend, test_client, test_session};
    use crate::services::Backend;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_report_passes_window() {
        let router = Router::new().route(
            "/reports",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("from").map(String::as_str), Some("2026-10-01"));
                Json(json!({
                    "success": true,
                    "data": {"systems": [{"system_id": 1, "name": "web", "uptime": "99.5", "sla": 99.0}]}
                }))
            }),
        );
        let base = spawn_backend(router).await;
        let api = test_client(&base);
        let cache = ResponseCache::new(Duration::from_secs(60));
        let session = test_session("t");
        let backend = Backend::new(&api, &cache, &session);

        let query = ReportQuery {
            from: NaiveDate::from_ymd_opt(2026, 10, 1),
            to: NaiveDate::from_ymd_opt(2026, 10, 7),
            system_id: None,
        };
        let report = backend.fetch_report(&query).await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].availability, 99.5);
    }
}
