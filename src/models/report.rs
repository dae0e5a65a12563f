use super::system::SystemStatus;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One system's figures after the backend payload has been normalized.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReportEntry {
    pub system_id: String,
    pub name: String,
    pub availability: f64,
    pub sla_target: f64,
    pub mttr_minutes: f64,
    pub incidents: u64,
    pub downtime_minutes: f64,
    pub status: Option<SystemStatus>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportRow {
    pub system_id: String,
    pub name: String,
    pub availability: f64,
    pub sla_target: f64,
    pub sla_met: bool,
    pub mttr_minutes: f64,
    pub incidents: u64,
    pub downtime_minutes: f64,
    pub status: String,
}

/// An incident synthesized from a system that is down now or recorded
/// downtime in the period.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Incident {
    pub system_id: String,
    pub name: String,
    pub ongoing: bool,
    pub downtime_minutes: f64,
    pub incidents: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReportRollup {
    pub systems: usize,
    pub average_availability: f64,
    pub average_mttr_minutes: f64,
    pub total_incidents: u64,
    pub total_downtime_minutes: f64,
    pub sla_compliance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Report window requested from the backend. Dates are inclusive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportQuery {
    #[serde(deserialize_with = "blank_as_none")]
    pub from: Option<NaiveDate>,
    #[serde(deserialize_with = "blank_as_none")]
    pub to: Option<NaiveDate>,
    pub system_id: Option<String>,
}

// Empty date inputs are submitted as `from=`.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Longest default window, about ten years.
const MAX_WINDOW_DAYS: i64 = 3660;

impl ReportQuery {
    /// Fills a missing window with the last `days` days ending `today`.
    /// `days` is clamped to `1..=MAX_WINDOW_DAYS`.
    pub fn resolved(&self, today: NaiveDate, days: i64) -> ReportQuery {
        let to = self.to.unwrap_or(today);
        let span = chrono::Duration::days(days.clamp(1, MAX_WINDOW_DAYS) - 1);
        let from = self
            .from
            .unwrap_or_else(|| to.checked_sub_signed(span).unwrap_or(NaiveDate::MIN));
        let (from, to) = if from > to { (to, from) } else { (from, to) };
        ReportQuery {
            from: Some(from),
            to: Some(to),
            system_id: self.system_id.clone().filter(|s| !s.is_empty()),
        }
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(from) = self.from {
            params.push(("from", from.to_string()));
        }
        if let Some(to) = self.to {
            params.push(("to", to.to_string()));
        }
        if let Some(id) = &self.system_id {
            params.push(("system_id", id.clone()));
        }
        params
    }
}
