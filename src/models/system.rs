use super::validation::{
    check_length, is_http_url, is_valid_host, parse_optional_f64, ValidationErrors,
};
use super::{deserialize_id, string_enum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum!(
    /// How the backend checks a system.
    ConnectionType {
        Api => "api",
        Snmp => "snmp",
        Ping => "ping",
        Webhook => "webhook",
    }
);

string_enum!(
    SystemStatus {
        Up => "up",
        Maintenance => "maintenance",
        Down => "down",
    }
);

string_enum!(
    Criticality {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
);

impl Default for SystemStatus {
    fn default() -> Self {
        SystemStatus::Up
    }
}

impl Default for Criticality {
    fn default() -> Self {
        Criticality::Medium
    }
}

impl ConnectionType {
    /// Api and webhook checks hit a URL; snmp and ping address a host.
    pub fn expects_url(&self) -> bool {
        matches!(self, ConnectionType::Api | ConnectionType::Webhook)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub system_type: String,
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub status: SystemStatus,
    #[serde(default)]
    pub criticality_level: Criticality,
    #[serde(default)]
    pub sla_target: f64,
    #[serde(default)]
    pub check_interval: u64,
    #[serde(default, alias = "target_endpoint", alias = "endpoint")]
    pub target: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body sent on create (POST) and update (PATCH).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub system_type: String,
    pub connection_type: ConnectionType,
    pub criticality_level: Criticality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SystemStatus>,
    pub sla_target: f64,
    pub check_interval: u64,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

pub const MIN_CHECK_INTERVAL: u64 = 10;
pub const MAX_CHECK_INTERVAL: u64 = 86_400;

/// Raw system form as posted by the browser. Every field stays a string so
/// a rejected submission can be rendered back exactly as typed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemForm {
    pub name: String,
    pub system_type: String,
    pub connection_type: String,
    pub criticality_level: String,
    pub status: String,
    pub sla_target: String,
    pub check_interval: String,
    pub target: String,
    pub owner: String,
    pub company: String,
    pub location: String,
    pub latitude: String,
    pub longitude: String,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl SystemForm {
    pub fn from_system(system: &System) -> Self {
        Self {
            name: system.name.clone(),
            system_type: system.system_type.clone(),
            connection_type: system.connection_type.to_string(),
            criticality_level: system.criticality_level.to_string(),
            status: system.status.to_string(),
            sla_target: system.sla_target.to_string(),
            check_interval: system.check_interval.to_string(),
            target: system.target.clone(),
            owner: system.owner.clone().unwrap_or_default(),
            company: system.company.clone().unwrap_or_default(),
            location: system.location.clone().unwrap_or_default(),
            latitude: system.latitude.map(|v| v.to_string()).unwrap_or_default(),
            longitude: system.longitude.map(|v| v.to_string()).unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<SystemPayload, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = self.name.trim();
        check_length(&mut errors, "name", name, 1, 100);
        let system_type = self.system_type.trim();
        check_length(&mut errors, "system_type", system_type, 1, 50);

        let connection_type = match self.connection_type.parse::<ConnectionType>() {
            Ok(c) => Some(c),
            Err(_) => {
                errors.add("connection_type", "must be one of api, snmp, ping, webhook");
                None
            }
        };

        let criticality_level = match self.criticality_level.parse::<Criticality>() {
            Ok(c) => c,
            Err(_) => {
                errors.add("criticality_level", "must be one of low, medium, high, critical");
                Criticality::default()
            }
        };

        let status = if self.status.trim().is_empty() {
            None
        } else {
            match self.status.parse::<SystemStatus>() {
                Ok(s) => Some(s),
                Err(_) => {
                    errors.add("status", "must be one of up, maintenance, down");
                    None
                }
            }
        };

        let sla_target = match self.sla_target.trim().parse::<f64>() {
            Ok(v) if (0.0..=100.0).contains(&v) => v,
            Ok(_) => {
                errors.add("sla_target", "must be between 0 and 100");
                0.0
            }
            Err(_) => {
                errors.add("sla_target", "must be a number");
                0.0
            }
        };

        let check_interval = match self.check_interval.trim().parse::<u64>() {
            Ok(v) if (MIN_CHECK_INTERVAL..=MAX_CHECK_INTERVAL).contains(&v) => v,
            _ => {
                errors.add(
                    "check_interval",
                    format!(
                        "must be a whole number of seconds between {} and {}",
                        MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL
                    ),
                );
                0
            }
        };

        let target = self.target.trim();
        if target.is_empty() {
            errors.add("target", "is required");
        } else if let Some(conn) = connection_type {
            if conn.expects_url() && !is_http_url(target) {
                errors.add("target", "must be an http(s) URL for api and webhook checks");
            } else if !conn.expects_url() && !is_valid_host(target) {
                errors.add("target", "must be a host name or IP address");
            }
        }

        check_length(&mut errors, "owner", self.owner.trim(), 0, 100);
        check_length(&mut errors, "company", self.company.trim(), 0, 100);
        check_length(&mut errors, "location", self.location.trim(), 0, 100);

        let latitude = parse_optional_f64(&mut errors, "latitude", &self.latitude);
        let longitude = parse_optional_f64(&mut errors, "longitude", &self.longitude);
        if let Some(lat) = latitude {
            if !(-90.0..=90.0).contains(&lat) {
                errors.add("latitude", "must be between -90 and 90");
            }
        }
        if let Some(lng) = longitude {
            if !(-180.0..=180.0).contains(&lng) {
                errors.add("longitude", "must be between -180 and 180");
            }
        }
        if latitude.is_some() != longitude.is_some()
            && !errors.has("latitude")
            && !errors.has("longitude")
        {
            errors.add("longitude", "latitude and longitude must be given together");
        }

        let Some(connection_type) = connection_type else {
            return Err(errors);
        };

        errors.finish(SystemPayload {
            name: name.to_string(),
            system_type: system_type.to_string(),
            connection_type,
            criticality_level,
            status,
            sla_target,
            check_interval,
            target: target.to_string(),
            owner: non_empty(&self.owner),
            company: non_empty(&self.company),
            location: non_empty(&self.location),
            latitude,
            longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> SystemForm {
        SystemForm {
            name: "Core DB".to_string(),
            system_type: "database".to_string(),
            connection_type: "ping".to_string(),
            criticality_level: "high".to_string(),
            sla_target: "99.9".to_string(),
            check_interval: "60".to_string(),
            target: "10.0.0.12".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_form() {
        let payload = valid_form().validate().unwrap();
        assert_eq!(payload.connection_type, ConnectionType::Ping);
        assert_eq!(payload.criticality_level, Criticality::High);
        assert_eq!(payload.sla_target, 99.9);
        assert_eq!(payload.owner, None);
        assert_eq!(payload.status, None);
    }

    #[test]
    fn test_sla_target_out_of_range() {
        for bad in ["100.5", "-1", "abc"] {
            let mut form = valid_form();
            form.sla_target = bad.to_string();
            let errors = form.validate().unwrap_err();
            assert!(errors.has("sla_target"), "{} should be rejected", bad);
        }

        let mut edge = valid_form();
        edge.sla_target = "100".to_string();
        assert!(edge.validate().is_ok());
        edge.sla_target = "0".to_string();
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_target_depends_on_connection_type() {
        let mut form = valid_form();
        form.connection_type = "api".to_string();
        assert!(form.validate().unwrap_err().has("target"));

        form.target = "https://status.example.com/health".to_string();
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_coordinates_must_pair() {
        let mut form = valid_form();
        form.latitude = "52.5".to_string();
        assert!(form.validate().unwrap_err().has("longitude"));

        form.longitude = "13.4".to_string();
        let payload = form.validate().unwrap();
        assert_eq!(payload.latitude, Some(52.5));

        form.latitude = "91".to_string();
        assert!(form.validate().unwrap_err().has("latitude"));
    }

    #[test]
    fn test_check_interval_bounds() {
        let mut form = valid_form();
        form.check_interval = "5".to_string();
        assert!(form.validate().unwrap_err().has("check_interval"));
    }

    #[test]
    fn test_deserialize_backend_system() {
        let json = serde_json::json!({
            "id": 7,
            "name": "Edge router",
            "type": "network",
            "connection_type": "snmp",
            "status": "down",
            "criticality_level": "critical",
            "sla_target": 99.5,
            "check_interval": 30,
            "target_endpoint": "192.168.1.1",
            "lat": 48.1,
            "lng": 11.5
        });
        let system: System = serde_json::from_value(json).unwrap();
        assert_eq!(system.id, "7");
        assert_eq!(system.status, SystemStatus::Down);
        assert_eq!(system.target, "192.168.1.1");
        assert_eq!(system.latitude, Some(48.1));

        let form = SystemForm::from_system(&system);
        assert_eq!(form.connection_type, "snmp");
        assert!(form.validate().is_ok());
    }
}
