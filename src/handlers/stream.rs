use super::{AppState, SessionExpired};
use crate::services::api::ApiError;
use crate::services::auth::Session;
use crate::services::stream::open_system_stream;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::stream::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Relays the backend's status stream to one browser. Each connection gets
/// its own upstream subscription, closed when the browser goes away.
pub async fn system_stream(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Result<Response, SessionExpired> {
    debug!("Browser subscribed to system status for {}", session.username);
    let snapshots = match open_system_stream(&state.api, &session).await {
        Ok(snapshots) => snapshots,
        Err(ApiError::Unauthorized) => return Err(SessionExpired::json()),
        Err(e) => {
            warn!("System status stream unavailable: {}", e);
            let body = Json(json!({ "error": e.user_message() }));
            return Ok((StatusCode::BAD_GATEWAY, body).into_response());
        }
    };
    let events = snapshots.map(|systems| Event::default().event("systems").json_data(&systems));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}
