//! Pure derivations from fetched collections: dashboard counters, chart
//! series, map markers and the report transforms.

use crate::models::alert::Alert;
use crate::models::report::{ChartPoint, Incident, Report, ReportEntry, ReportRollup, ReportRow};
use crate::models::system::{ConnectionType, Criticality, System, SystemStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

const ALERT_HISTORY_DAYS: i64 = 7;
const MAX_SNIFF_DEPTH: usize = 3;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 * 100.0 / whole as f64)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardSummary {
    pub total: usize,
    pub up: usize,
    pub maintenance: usize,
    pub down: usize,
    pub percent_up: f64,
    pub by_criticality: Vec<ChartPoint>,
    pub by_connection: Vec<ChartPoint>,
    pub alerts_per_day: Vec<ChartPoint>,
    pub alerts_last_24h: usize,
    /// High and critical systems that are down, by name.
    pub critical_down: Vec<String>,
}

pub fn dashboard_summary(systems: &[System], alerts: &[Alert], now: DateTime<Utc>) -> DashboardSummary {
    let count = |status: SystemStatus| systems.iter().filter(|s| s.status == status).count();
    let up = count(SystemStatus::Up);

    let by_criticality = Criticality::ALL
        .iter()
        .map(|c| ChartPoint {
            label: c.to_string(),
            value: systems.iter().filter(|s| s.criticality_level == *c).count() as f64,
        })
        .collect();

    let by_connection = ConnectionType::ALL
        .iter()
        .map(|c| ChartPoint {
            label: c.to_string(),
            value: systems.iter().filter(|s| s.connection_type == *c).count() as f64,
        })
        .collect();

    let today = now.date_naive();
    let alerts_per_day = (0..ALERT_HISTORY_DAYS)
        .rev()
        .map(|back| {
            let day = today - Duration::days(back);
            ChartPoint {
                label: day.format("%m-%d").to_string(),
                value: alerts
                    .iter()
                    .filter(|a| a.sent_at.map(|t| t.date_naive()) == Some(day))
                    .count() as f64,
            }
        })
        .collect();

    let since = now - Duration::hours(24);
    let alerts_last_24h = alerts
        .iter()
        .filter(|a| a.sent_at.map(|t| t > since && t <= now).unwrap_or(false))
        .count();

    let critical_down = systems
        .iter()
        .filter(|s| {
            s.status == SystemStatus::Down
                && matches!(s.criticality_level, Criticality::High | Criticality::Critical)
        })
        .map(|s| s.name.clone())
        .collect();

    DashboardSummary {
        total: systems.len(),
        up,
        maintenance: count(SystemStatus::Maintenance),
        down: count(SystemStatus::Down),
        percent_up: percent(up, systems.len()),
        by_criticality,
        by_connection,
        alerts_per_day,
        alerts_last_24h,
        critical_down,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapMarker {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: SystemStatus,
    pub color: &'static str,
    pub location: Option<String>,
}

pub fn status_color(status: SystemStatus) -> &'static str {
    match status {
        SystemStatus::Up => "#22c55e",
        SystemStatus::Maintenance => "#f59e0b",
        SystemStatus::Down => "#ef4444",
    }
}

/// Systems without both coordinates are left off the map.
pub fn map_markers(systems: &[System]) -> Vec<MapMarker> {
    systems
        .iter()
        .filter_map(|s| {
            let (latitude, longitude) = (s.latitude?, s.longitude?);
            Some(MapMarker {
                id: s.id.clone(),
                name: s.name.clone(),
                latitude,
                longitude,
                status: s.status,
                color: status_color(s.status),
                location: s.location.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Report normalization
// ---------------------------------------------------------------------------

/// Normalizes a report payload by trying the known shapes in order: a bare
/// array of entries, `{systems: [...]}`, `{data: <shape>}`,
/// `{report: <shape>}`, and `{metrics: {<id>: entry}}`. Unknown shapes give
/// an empty report.
pub fn normalize_report(payload: &Value) -> Report {
    Report {
        entries: sniff(payload, 0).unwrap_or_default(),
    }
}

fn sniff(value: &Value, depth: usize) -> Option<Vec<ReportEntry>> {
    if depth > MAX_SNIFF_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => Some(entries_from(items)),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("systems") {
                return Some(entries_from(items));
            }
            for wrapper in ["data", "report"] {
                if let Some(inner) = map.get(wrapper) {
                    if let Some(entries) = sniff(inner, depth + 1) {
                        return Some(entries);
                    }
                }
            }
            if let Some(Value::Object(metrics)) = map.get("metrics") {
                return Some(
                    metrics
                        .iter()
                        .filter_map(|(id, entry)| parse_entry(entry, Some(id)))
                        .collect(),
                );
            }
            None
        }
        _ => None,
    }
}

fn entries_from(items: &[Value]) -> Vec<ReportEntry> {
    items.iter().filter_map(|item| parse_entry(item, None)).collect()
}

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

/// JSON numbers and numeric strings, optionally with a trailing `%`.
fn number(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_entry(value: &Value, fallback_id: Option<&str>) -> Option<ReportEntry> {
    let map = value.as_object()?;
    let name = field(map, &["system_name", "name"]).and_then(text);
    let system_id = field(map, &["system_id", "id"])
        .and_then(text)
        .or_else(|| fallback_id.map(str::to_string))
        .or_else(|| name.clone())?;

    let num = |keys: &[&str]| field(map, keys).and_then(number).unwrap_or(0.0);

    let incidents = match field(map, &["incident_count", "incidents"]) {
        Some(Value::Array(list)) => list.len() as u64,
        Some(other) => number(other).map(|n| n.max(0.0) as u64).unwrap_or(0),
        None => 0,
    };

    Some(ReportEntry {
        name: name.unwrap_or_else(|| system_id.clone()),
        system_id,
        availability: num(&["availability", "uptime", "availability_percent"]).clamp(0.0, 100.0),
        sla_target: num(&["sla_target", "sla"]).clamp(0.0, 100.0),
        mttr_minutes: num(&["mttr_minutes", "mttr"]).max(0.0),
        incidents,
        downtime_minutes: num(&["downtime_minutes", "downtime"]).max(0.0),
        status: field(map, &["status"])
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
    })
}

// ---------------------------------------------------------------------------
// Report transforms
// ---------------------------------------------------------------------------

pub fn report_rows(report: &Report) -> Vec<ReportRow> {
    report
        .entries
        .iter()
        .map(|e| ReportRow {
            system_id: e.system_id.clone(),
            name: e.name.clone(),
            availability: round2(e.availability),
            sla_target: round2(e.sla_target),
            sla_met: e.availability >= e.sla_target,
            mttr_minutes: round2(e.mttr_minutes),
            incidents: e.incidents,
            downtime_minutes: round2(e.downtime_minutes),
            status: e
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
        .collect()
}

/// Systems that are down now or were down during the window, in report
/// order.
pub fn incident_list(report: &Report) -> Vec<Incident> {
    report
        .entries
        .iter()
        .filter(|e| e.status == Some(SystemStatus::Down) || e.downtime_minutes > 0.0)
        .map(|e| Incident {
            system_id: e.system_id.clone(),
            name: e.name.clone(),
            ongoing: e.status == Some(SystemStatus::Down),
            downtime_minutes: round2(e.downtime_minutes),
            incidents: e.incidents,
        })
        .collect()
}

pub fn report_rollup(report: &Report) -> ReportRollup {
    let entries = &report.entries;
    if entries.is_empty() {
        return ReportRollup::default();
    }
    let n = entries.len() as f64;

    let repaired: Vec<f64> = entries
        .iter()
        .map(|e| e.mttr_minutes)
        .filter(|m| *m > 0.0)
        .collect();
    let average_mttr_minutes = if repaired.is_empty() {
        0.0
    } else {
        repaired.iter().sum::<f64>() / repaired.len() as f64
    };

    let met = entries.iter().filter(|e| e.availability >= e.sla_target).count();

    ReportRollup {
        systems: entries.len(),
        average_availability: round2(entries.iter().map(|e| e.availability).sum::<f64>() / n),
        average_mttr_minutes: round2(average_mttr_minutes),
        total_incidents: entries.iter().map(|e| e.incidents).sum(),
        total_downtime_minutes: round2(entries.iter().map(|e| e.downtime_minutes).sum()),
        sla_compliance: percent(met, entries.len()),
    }
}

pub fn availability_series(report: &Report) -> Vec<ChartPoint> {
    report
        .entries
        .iter()
        .map(|e| ChartPoint {
            label: e.name.clone(),
            value: round2(e.availability),
        })
        .collect()
}
