use super::validation::{check_length, is_valid_email, is_valid_username, ValidationErrors};
use super::user::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_length(&mut errors, "identifier", self.identifier.trim(), 1, 254);
        check_length(&mut errors, "password", &self.password, 1, MAX_PASSWORD_LEN);
        errors.finish(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if !is_valid_username(self.username.trim()) {
            errors.add("username", "must be 3-32 letters, digits, '.', '_' or '-'");
        }
        if !is_valid_email(self.email.trim()) {
            errors.add("email", "must be a valid email address");
        }
        check_length(
            &mut errors,
            "password",
            &self.password,
            MIN_PASSWORD_LEN,
            MAX_PASSWORD_LEN,
        );
        if self.password != self.confirm_password {
            errors.add("confirm_password", "passwords do not match");
        }
        errors.finish(())
    }
}

/// Access and refresh tokens issued by the backend's auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

/// The only claim the console reads from an access token.
#[derive(Debug, Deserialize)]
pub struct Claims {
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInBody<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignUpBody<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshBody<'a> {
    pub refresh_token: &'a str,
}
