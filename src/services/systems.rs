use super::api::{decode_list, ApiError};
use super::{echoed, id_segment, Backend};
use crate::models::system::{System, SystemPayload};
use serde_json::Value;
use tracing::info;

const SYSTEMS: &str = "/systems";

impl Backend<'_> {
    pub async fn list_systems(&self) -> Result<Vec<System>, ApiError> {
        decode_list(self.cached(SYSTEMS, &[]).await?)
    }

    pub async fn get_system(&self, id: &str) -> Result<System, ApiError> {
        let path = format!("{}/{}", SYSTEMS, id_segment(id)?);
        Ok(serde_json::from_value(self.cached(&path, &[]).await?)?)
    }

    pub async fn create_system(&self, payload: &SystemPayload) -> Result<Option<System>, ApiError> {
        let value: Value = self
            .api
            .post(&self.session.credentials, SYSTEMS, payload)
            .await?;
        self.invalidate(SYSTEMS);
        let system: Option<System> = echoed(value);
        match &system {
            Some(system) => info!("{} created system {} ({})", self.session.username, system.name, system.id),
            None => info!("{} created system {}", self.session.username, payload.name),
        }
        Ok(system)
    }

    pub async fn update_system(&self, id: &str, payload: &SystemPayload) -> Result<Option<System>, ApiError> {
        let path = format!("{}/{}", SYSTEMS, id_segment(id)?);
        let value: Value = self
            .api
            .patch(&self.session.credentials, &path, payload)
            .await?;
        self.invalidate(SYSTEMS);
        info!("{} updated system {}", self.session.username, id);
        Ok(echoed(value))
    }

    pub async fn delete_system(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{}/{}", SYSTEMS, id_segment(id)?);
        self.api.delete(&self.session.credentials, &path).await?;
        self.invalidate(SYSTEMS);
        // Reports and alerts reference the system.
        self.invalidate("/reports");
        self.invalidate("/alerts");
        info!("{} deleted system {}", self.session.username, id);
        Ok(())
    }
}
