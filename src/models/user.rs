use super::validation::{check_length, is_valid_email, is_valid_username, ValidationErrors};
use super::{deserialize_id, deserialize_page, string_enum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum!(
    Role {
        Admin => "admin",
        Operator => "operator",
        Viewer => "viewer",
    }
);

string_enum!(
    /// `block` is the backend's spelling for a blocked account.
    UserStatus {
        Active => "active",
        Block => "block",
        Registered => "registered",
    }
);

impl Default for Role {
    fn default() -> Self {
        Role::Viewer
    }
}

impl Default for UserStatus {
    fn default() -> Self {
        UserStatus::Registered
    }
}

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_blocked(&self) -> bool {
        self.status == UserStatus::Block
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserPayload {
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Body of the PATCH used for block and unblock.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserStatusPatch {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserForm {
    pub username: String,
    pub email: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl UserForm {
    pub fn from_user(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.to_string(),
            password: String::new(),
        }
    }

    /// Passwords are mandatory on create; on update a blank password
    /// leaves the current one in place.
    pub fn validate(&self, creating: bool) -> Result<UserPayload, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let username = self.username.trim();
        if !is_valid_username(username) {
            errors.add("username", "must be 3-32 letters, digits, '.', '_' or '-'");
        }
        let email = self.email.trim();
        if !is_valid_email(email) {
            errors.add("email", "must be a valid email address");
        }
        let role = match self.role.parse::<Role>() {
            Ok(role) => role,
            Err(_) => {
                errors.add("role", "must be one of admin, operator, viewer");
                Role::default()
            }
        };

        let password = if self.password.is_empty() && !creating {
            None
        } else {
            check_length(
                &mut errors,
                "password",
                &self.password,
                MIN_PASSWORD_LEN,
                MAX_PASSWORD_LEN,
            );
            Some(self.password.clone())
        };

        errors.finish(UserPayload {
            username: username.to_string(),
            email: email.to_string(),
            role,
            password,
        })
    }
}

/// Query parameters accepted by the user listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserFilter {
    pub role: Option<String>,
    pub status: Option<String>,
    pub q: Option<String>,
    #[serde(deserialize_with = "deserialize_page")]
    pub page: Option<usize>,
}

impl UserFilter {
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }

    pub fn status(&self) -> Option<UserStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }
}
