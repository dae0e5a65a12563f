use super::api::{decode_list, ApiError};
use super::{echoed, Backend};
use crate::models::integration::{Integration, IntegrationPayload};
use serde_json::Value;
use tracing::info;

const INTEGRATIONS: &str = "/integrations";

impl Backend<'_> {
    pub async fn list_integrations(&self) -> Result<Vec<Integration>, ApiError> {
        decode_list(self.cached(INTEGRATIONS, &[]).await?)
    }

    /// Creates an integration. For agents the echoed record carries the
    /// token the backend issued.
    pub async fn create_integration(&self, payload: &IntegrationPayload) -> Result<Option<Integration>, ApiError> {
        let value: Value = self
            .api
            .post(&self.session.credentials, INTEGRATIONS, payload)
            .await?;
        self.invalidate(INTEGRATIONS);
        info!("{} created integration {}", self.session.username, payload.name());
        Ok(echoed(value))
    }
}
