use crate::models::alert::Alert;
use crate::models::system::{System, SystemStatus};
use crate::models::user::{User, UserFilter};
use serde::Serialize;

fn matches_query(query: &str, fields: &[&str]) -> bool {
    let needle = query.trim().to_lowercase();
    needle.is_empty() || fields.iter().any(|f| f.to_lowercase().contains(&needle))
}

/// Applies role, status and free-text filters. Unparseable filter values
/// are ignored rather than matching nothing.
pub fn filter_users(users: Vec<User>, filter: &UserFilter) -> Vec<User> {
    let role = filter.role();
    let status = filter.status();
    let query = filter.q.as_deref().unwrap_or("");
    users
        .into_iter()
        .filter(|u| role.map_or(true, |r| u.role == r))
        .filter(|u| status.map_or(true, |s| u.status == s))
        .filter(|u| matches_query(query, &[&u.username, &u.email]))
        .collect()
}

pub fn filter_systems(systems: Vec<System>, status: Option<SystemStatus>, query: &str) -> Vec<System> {
    systems
        .into_iter()
        .filter(|s| status.map_or(true, |st| s.status == st))
        .filter(|s| {
            matches_query(
                query,
                &[
                    &s.name,
                    &s.system_type,
                    &s.target,
                    s.owner.as_deref().unwrap_or(""),
                    s.company.as_deref().unwrap_or(""),
                ],
            )
        })
        .collect()
}

pub fn filter_alerts(alerts: Vec<Alert>, system_id: Option<&str>) -> Vec<Alert> {
    match system_id.filter(|id| !id.is_empty()) {
        Some(id) => alerts
            .into_iter()
            .filter(|a| a.system_id.as_deref() == Some(id))
            .collect(),
        None => alerts,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    pub page: usize,
    pub pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    pub fn prev(&self) -> usize {
        self.page.saturating_sub(1).max(1)
    }

    pub fn next(&self) -> usize {
        (self.page + 1).min(self.pages)
    }
}

/// Slices one page out of `items`. Out-of-range pages clamp to the nearest
/// valid page; an empty list is a single empty page.
pub fn paginate<T>(items: Vec<T>, page: Option<usize>, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let total = items.len();
    let pages = total.div_ceil(page_size).max(1);
    let page = page.unwrap_or(1).clamp(1, pages);
    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();
    Page {
        items,
        page,
        pages,
        total,
    }
}
