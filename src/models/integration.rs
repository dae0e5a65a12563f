use super::validation::{check_length, is_http_url, ValidationErrors};
use super::{deserialize_id, string_enum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum!(
    /// Agent integrations get a backend-issued token; external API
    /// integrations bring their own credentials.
    IntegrationType {
        Agent => "agent",
        ExternalApi => "external_api",
    }
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Integration {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    #[serde(default)]
    pub agent_token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Integration {
    /// The credential shown in listings, masked down to its last four
    /// characters.
    pub fn masked_credential(&self) -> String {
        let secret = match self.integration_type {
            IntegrationType::Agent => self.agent_token.as_deref(),
            IntegrationType::ExternalApi => self.api_key.as_deref(),
        };
        secret.map(mask_secret).unwrap_or_else(|| "-".to_string())
    }
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(8), tail)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationPayload {
    Agent {
        name: String,
    },
    ExternalApi {
        name: String,
        api_url: String,
        api_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        api_secret: Option<String>,
    },
}

impl IntegrationPayload {
    pub fn name(&self) -> &str {
        match self {
            IntegrationPayload::Agent { name } => name,
            IntegrationPayload::ExternalApi { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IntegrationForm {
    pub name: String,
    pub integration_type: String,
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl IntegrationForm {
    pub fn validate(&self) -> Result<IntegrationPayload, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = self.name.trim().to_string();
        check_length(&mut errors, "name", &name, 1, 100);

        let kind = match self.integration_type.parse::<IntegrationType>() {
            Ok(kind) => kind,
            Err(_) => {
                errors.add("integration_type", "must be agent or external_api");
                return Err(errors);
            }
        };

        match kind {
            IntegrationType::Agent => errors.finish(IntegrationPayload::Agent { name }),
            IntegrationType::ExternalApi => {
                let api_url = self.api_url.trim().to_string();
                if !is_http_url(&api_url) {
                    errors.add("api_url", "must be an http(s) URL");
                }
                let api_key = self.api_key.trim().to_string();
                if api_key.is_empty() {
                    errors.add("api_key", "is required");
                }
                let api_secret = self.api_secret.trim();
                errors.finish(IntegrationPayload::ExternalApi {
                    name,
                    api_url,
                    api_key,
                    api_secret: (!api_secret.is_empty()).then(|| api_secret.to_string()),
                })
            }
        }
    }
}
