use super::api::{decode_list, ApiError};
use super::{echoed, id_segment, Backend};
use crate::models::user::{User, UserPayload, UserStatus, UserStatusPatch};
use serde_json::Value;
use tracing::info;

const USERS: &str = "/users";

impl Backend<'_> {
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        decode_list(self.cached(USERS, &[]).await?)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ApiError> {
        let path = format!("{}/{}", USERS, id_segment(id)?);
        Ok(serde_json::from_value(self.cached(&path, &[]).await?)?)
    }

    pub async fn create_user(&self, payload: &UserPayload) -> Result<Option<User>, ApiError> {
        let value: Value = self.api.post(&self.session.credentials, USERS, payload).await?;
        self.invalidate(USERS);
        info!("{} created user {}", self.session.username, payload.username);
        Ok(echoed(value))
    }

    pub async fn update_user(&self, id: &str, payload: &UserPayload) -> Result<Option<User>, ApiError> {
        let path = format!("{}/{}", USERS, id_segment(id)?);
        let value: Value = self
            .api
            .patch(&self.session.credentials, &path, payload)
            .await?;
        self.invalidate(USERS);
        info!("{} updated user {}", self.session.username, id);
        Ok(echoed(value))
    }

    /// Block and unblock are plain status transitions on the backend.
    pub async fn set_user_status(&self, id: &str, status: UserStatus) -> Result<(), ApiError> {
        let path = format!("{}/{}", USERS, id_segment(id)?);
        let _: Value = self
            .api
            .patch(&self.session.credentials, &path, &UserStatusPatch { status })
            .await?;
        self.invalidate(USERS);
        info!("{} set user {} to {}", self.session.username, id, status);
        Ok(())
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{}/{}", USERS, id_segment(id)?);
        self.api.delete(&self.session.credentials, &path).await?;
        self.invalidate(USERS);
        info!("{} deleted user {}", self.session.username, id);
        Ok(())
    }
}
