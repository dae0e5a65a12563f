use super::api::{decode_list, ApiError};
use super::{id_segment, Backend};
use crate::models::alert::Alert;

impl Backend<'_> {
    /// Alerts, newest first, optionally for a single system.
    pub async fn list_alerts(&self, system_id: Option<&str>) -> Result<Vec<Alert>, ApiError> {
        let query = match system_id {
            Some(id) => vec![("system_id", id_segment(id)?.to_string())],
            None => Vec::new(),
        };
        let mut alerts: Vec<Alert> = decode_list(self.cached("/alerts", &query).await?)?;
        alerts.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(alerts)
    }
}
