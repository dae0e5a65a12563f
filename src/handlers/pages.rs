use super::{render, AppState, Inline, SessionExpired};
use crate::models::alert::Alert;
use crate::models::auth::{LoginRequest, SignUpRequest};
use crate::models::config::SessionConfig;
use crate::models::deserialize_page;
use crate::models::integration::{Integration, IntegrationForm, IntegrationType};
use crate::models::report::{Incident, ReportQuery, ReportRollup, ReportRow};
use crate::models::system::{ConnectionType, Criticality, System, SystemForm, SystemStatus};
use crate::models::user::{Role, User, UserFilter, UserForm, UserStatus};
use crate::models::validation::ValidationErrors;
use crate::services::auth::{AuthError, Session};
use crate::services::api::ApiError;
use crate::services::metrics::{self, DashboardSummary};
use crate::utils::listing::{filter_alerts, filter_systems, filter_users, paginate, Page};
use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Extension, Form,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_cookies::cookie::{time::Duration as CookieDuration, SameSite};
use tower_cookies::{Cookie, Cookies};
use tracing::{info, warn};

type PageResult = Result<Response, SessionExpired>;

// Shared view helpers

pub(crate) struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

fn enum_options<T: std::fmt::Display>(all: &[T], current: &str) -> Vec<SelectOption> {
    all.iter()
        .map(|v| {
            let value = v.to_string();
            SelectOption {
                selected: value.eq_ignore_ascii_case(current.trim()),
                label: value.replace('_', " "),
                value,
            }
        })
        .collect()
}

fn system_options(systems: &[System], current: &str) -> Vec<SelectOption> {
    systems
        .iter()
        .map(|s| SelectOption {
            value: s.id.clone(),
            label: s.name.clone(),
            selected: s.id == current,
        })
        .collect()
}

/// Encoded `key=value&` pairs for links that carry the current filters.
/// Empty values are left out.
pub(crate) fn query_string(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| format!("{}={}&", k, urlencoding::encode(v.trim())))
        .collect()
}

/// JSON for embedding in an inline `<script>`.
fn script_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/")
}

fn keep<T: Default>(result: Result<T, String>, errors: &mut Vec<String>) -> T {
    result.unwrap_or_else(|message| {
        errors.push(message);
        T::default()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NoticeQuery {
    notice: Option<String>,
}

fn notice_text(code: Option<&str>) -> Option<&'static str> {
    let text = match code? {
        "registered" => "Account created. You can sign in now.",
        "system-created" => "System created.",
        "system-updated" => "System updated.",
        "system-deleted" => "System deleted.",
        "integration-created" => "Integration created.",
        "user-created" => "User created.",
        "user-updated" => "User updated.",
        "user-deleted" => "User deleted.",
        "user-blocked" => "User blocked.",
        "user-unblocked" => "User unblocked.",
        _ => return None,
    };
    Some(text)
}

fn session_cookie(config: &SessionConfig, session_id: &str) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::seconds(config.timeout_secs))
        .build()
}

pub async fn root() -> impl IntoResponse {
    Redirect::to("/dashboard")
}

// Sign in, sign up, sign out

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    identifier: String,
    error: Option<String>,
    errors: ValidationErrors,
    notice: Option<&'static str>,
}

pub async fn login_page(Query(query): Query<NoticeQuery>) -> Response {
    render(&LoginTemplate {
        identifier: String::new(),
        error: None,
        errors: ValidationErrors::new(),
        notice: notice_text(query.notice.as_deref()),
    })
}

fn auth_failure_status(error: &AuthError) -> StatusCode {
    match error {
        AuthError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::Api(ApiError::Unauthorized) => StatusCode::UNAUTHORIZED,
        AuthError::Api(ApiError::Status { status, .. }) if *status < 500 => StatusCode::BAD_REQUEST,
        AuthError::Api(_) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn login_handler(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(req): Form<LoginRequest>,
) -> Response {
    match state.auth.sign_in(&req).await {
        Ok(session) => {
            cookies.add(session_cookie(&state.config.session, &session.id));
            Redirect::to("/dashboard").into_response()
        }
        Err(e) => {
            warn!("Sign-in failed for {}: {}", req.identifier.trim(), e);
            let errors = match &e {
                AuthError::Invalid(errors) => errors.clone(),
                AuthError::Api(_) => ValidationErrors::new(),
            };
            let template = LoginTemplate {
                identifier: req.identifier.trim().to_string(),
                error: Some(e.user_message()),
                errors,
                notice: None,
            };
            (auth_failure_status(&e), render(&template)).into_response()
        }
    }
}

#[derive(Template)]
#[template(path = "signup.html")]
struct SignupTemplate {
    form_username: String,
    form_email: String,
    error: Option<String>,
    errors: ValidationErrors,
}

pub async fn signup_page() -> Response {
    render(&SignupTemplate {
        form_username: String::new(),
        form_email: String::new(),
        error: None,
        errors: ValidationErrors::new(),
    })
}

pub async fn signup_handler(State(state): State<AppState>, Form(req): Form<SignUpRequest>) -> Response {
    match state.auth.sign_up(&req).await {
        Ok(()) => Redirect::to("/login?notice=registered").into_response(),
        Err(e) => {
            let errors = match &e {
                AuthError::Invalid(errors) => errors.clone(),
                AuthError::Api(_) => ValidationErrors::new(),
            };
            let template = SignupTemplate {
                form_username: req.username.trim().to_string(),
                form_email: req.email.trim().to_string(),
                error: Some(e.user_message()),
                errors,
            };
            (auth_failure_status(&e), render(&template)).into_response()
        }
    }
}

pub async fn logout_handler(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(session): Extension<Arc<Session>>,
) -> Redirect {
    state.end_session(&cookies, &session.id).await;
    Redirect::to("/login")
}

// Dashboard

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    username: String,
    active: &'static str,
    errors: Vec<String>,
    summary: DashboardSummary,
    chart_json: String,
    recent_alerts: Vec<Alert>,
}

pub async fn dashboard_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> PageResult {
    let backend = state.backend(&session);
    let (systems, alerts) = tokio::join!(backend.list_systems(), backend.list_alerts(None));

    let mut errors = Vec::new();
    let systems = keep(systems.inline()?, &mut errors);
    let alerts = keep(alerts.inline()?, &mut errors);

    let summary = metrics::dashboard_summary(&systems, &alerts, Utc::now());
    Ok(render(&DashboardTemplate {
        username: session.username.clone(),
        active: "dashboard",
        errors,
        chart_json: script_json(&summary),
        summary,
        recent_alerts: alerts.into_iter().take(5).collect(),
    }))
}

// Systems

#[derive(Template)]
#[template(path = "systems.html")]
struct SystemsTemplate {
    username: String,
    active: &'static str,
    error: Option<String>,
    notice: Option<&'static str>,
    systems: Page<System>,
    status_options: Vec<SelectOption>,
    q: String,
    filter_query: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SystemListQuery {
    status: String,
    q: String,
    #[serde(deserialize_with = "deserialize_page")]
    page: Option<usize>,
    notice: Option<String>,
}

pub async fn systems_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<SystemListQuery>,
) -> PageResult {
    systems_view(&state, &session, query, None).await
}

async fn systems_view(
    state: &AppState,
    session: &Session,
    query: SystemListQuery,
    action_error: Option<String>,
) -> PageResult {
    let (systems, error) = match state.backend(session).list_systems().await.inline()? {
        Ok(systems) => (systems, action_error),
        Err(message) => (Vec::new(), Some(message)),
    };

    let status = query.status.parse::<SystemStatus>().ok();
    let filtered = filter_systems(systems, status, &query.q);
    Ok(render(&SystemsTemplate {
        username: session.username.clone(),
        active: "systems",
        error,
        notice: notice_text(query.notice.as_deref()),
        systems: paginate(filtered, query.page, state.config.display.page_size),
        status_options: enum_options(SystemStatus::ALL, &query.status),
        filter_query: query_string(&[("status", &query.status), ("q", &query.q)]),
        q: query.q,
    }))
}

#[derive(Template)]
#[template(path = "system_form.html")]
struct SystemFormTemplate {
    username: String,
    active: &'static str,
    title: &'static str,
    action: String,
    form: SystemForm,
    errors: ValidationErrors,
    error: Option<String>,
    connection_options: Vec<SelectOption>,
    criticality_options: Vec<SelectOption>,
    status_options: Vec<SelectOption>,
}

impl SystemFormTemplate {
    fn new(session: &Session, title: &'static str, action: String, form: SystemForm) -> Self {
        Self {
            username: session.username.clone(),
            active: "systems",
            title,
            action,
            connection_options: enum_options(ConnectionType::ALL, &form.connection_type),
            criticality_options: enum_options(Criticality::ALL, &form.criticality_level),
            status_options: enum_options(SystemStatus::ALL, &form.status),
            form,
            errors: ValidationErrors::new(),
            error: None,
        }
    }

    fn with_errors(mut self, errors: ValidationErrors) -> Self {
        self.errors = errors;
        self
    }

    fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

fn blank_system_form() -> SystemForm {
    SystemForm {
        connection_type: ConnectionType::Api.to_string(),
        criticality_level: Criticality::default().to_string(),
        status: SystemStatus::default().to_string(),
        sla_target: "99.9".to_string(),
        check_interval: "60".to_string(),
        ..Default::default()
    }
}

pub async fn new_system_page(Extension(session): Extension<Arc<Session>>) -> Response {
    render(&SystemFormTemplate::new(
        &session,
        "New system",
        "/systems/new".to_string(),
        blank_system_form(),
    ))
}

pub async fn create_system_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Form(form): Form<SystemForm>,
) -> PageResult {
    let action = "/systems/new".to_string();
    let payload = match form.validate() {
        Ok(payload) => payload,
        Err(errors) => {
            let template = SystemFormTemplate::new(&session, "New system", action, form).with_errors(errors);
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, render(&template)).into_response());
        }
    };

    match state.backend(&session).create_system(&payload).await.inline()? {
        Ok(_) => Ok(Redirect::to("/systems?notice=system-created").into_response()),
        Err(message) => {
            let template = SystemFormTemplate::new(&session, "New system", action, form).with_error(message);
            Ok(render(&template))
        }
    }
}

pub async fn edit_system_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    let action = format!("/systems/{}/edit", urlencoding::encode(&id));
    let template = match state.backend(&session).get_system(&id).await.inline()? {
        Ok(system) => SystemFormTemplate::new(&session, "Edit system", action, SystemForm::from_system(&system)),
        Err(message) => SystemFormTemplate::new(&session, "Edit system", action, blank_system_form()).with_error(message),
    };
    Ok(render(&template))
}

pub async fn update_system_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
    Form(form): Form<SystemForm>,
) -> PageResult {
    let action = format!("/systems/{}/edit", urlencoding::encode(&id));
    let payload = match form.validate() {
        Ok(payload) => payload,
        Err(errors) => {
            let template = SystemFormTemplate::new(&session, "Edit system", action, form).with_errors(errors);
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, render(&template)).into_response());
        }
    };

    match state.backend(&session).update_system(&id, &payload).await.inline()? {
        Ok(_) => Ok(Redirect::to("/systems?notice=system-updated").into_response()),
        Err(message) => {
            let template = SystemFormTemplate::new(&session, "Edit system", action, form).with_error(message);
            Ok(render(&template))
        }
    }
}

pub async fn delete_system_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    match state.backend(&session).delete_system(&id).await.inline()? {
        Ok(()) => Ok(Redirect::to("/systems?notice=system-deleted").into_response()),
        Err(message) => systems_view(&state, &session, SystemListQuery::default(), Some(message)).await,
    }
}

// Alerts

struct AlertRow {
    sent_at: String,
    system: String,
    trigger_condition: String,
    notification_type: String,
    recipient: String,
}

#[derive(Template)]
#[template(path = "alerts.html")]
struct AlertsTemplate {
    username: String,
    active: &'static str,
    errors: Vec<String>,
    alerts: Page<AlertRow>,
    system_options: Vec<SelectOption>,
    filter_query: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AlertListQuery {
    system_id: String,
    #[serde(deserialize_with = "deserialize_page")]
    page: Option<usize>,
}

pub async fn alerts_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<AlertListQuery>,
) -> PageResult {
    let backend = state.backend(&session);
    let system_id = Some(query.system_id.trim()).filter(|id| !id.is_empty());
    let (alerts, systems) = tokio::join!(backend.list_alerts(system_id), backend.list_systems());

    let mut errors = Vec::new();
    let alerts = filter_alerts(keep(alerts.inline()?, &mut errors), system_id);
    let systems = keep(systems.inline()?, &mut errors);

    let names: HashMap<&str, &str> = systems.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();
    let rows: Vec<AlertRow> = alerts
        .iter()
        .map(|a| AlertRow {
            sent_at: a.sent_at_display(),
            system: a
                .system_name
                .clone()
                .or_else(|| {
                    a.system_id
                        .as_deref()
                        .and_then(|id| names.get(id).map(|n| n.to_string()))
                })
                .or_else(|| a.system_id.clone())
                .unwrap_or_else(|| "-".to_string()),
            trigger_condition: a.trigger_condition.clone(),
            notification_type: a.notification_type.clone(),
            recipient: a.recipient.clone(),
        })
        .collect();

    Ok(render(&AlertsTemplate {
        username: session.username.clone(),
        active: "alerts",
        errors,
        alerts: paginate(rows, query.page, state.config.display.page_size),
        system_options: system_options(&systems, &query.system_id),
        filter_query: query_string(&[("system_id", &query.system_id)]),
    }))
}

// Integrations

#[derive(Template)]
#[template(path = "integrations.html")]
struct IntegrationsTemplate {
    username: String,
    active: &'static str,
    error: Option<String>,
    notice: Option<&'static str>,
    issued: Option<IssuedToken>,
    integrations: Vec<Integration>,
    form: IntegrationForm,
    errors: ValidationErrors,
    type_options: Vec<SelectOption>,
}

/// An agent token as issued by the backend. Listings only ever show it
/// masked, so it is displayed in full once, right after creation.
struct IssuedToken {
    name: String,
    token: String,
}

async fn integrations_view(
    state: &AppState,
    session: &Session,
    form: IntegrationForm,
    errors: ValidationErrors,
    action_error: Option<String>,
    notice: Option<&'static str>,
    issued: Option<IssuedToken>,
) -> PageResult {
    let (integrations, error) = match state.backend(session).list_integrations().await.inline()? {
        Ok(list) => (list, action_error),
        Err(message) => (Vec::new(), Some(message)),
    };
    Ok(render(&IntegrationsTemplate {
        username: session.username.clone(),
        active: "integrations",
        error,
        notice,
        issued,
        integrations,
        type_options: enum_options(IntegrationType::ALL, &form.integration_type),
        form,
        errors,
    }))
}

pub async fn integrations_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<NoticeQuery>,
) -> PageResult {
    let form = IntegrationForm {
        integration_type: IntegrationType::Agent.to_string(),
        ..Default::default()
    };
    let notice = notice_text(query.notice.as_deref());
    integrations_view(&state, &session, form, ValidationErrors::new(), None, notice, None).await
}

pub async fn create_integration_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Form(form): Form<IntegrationForm>,
) -> PageResult {
    let payload = match form.validate() {
        Ok(payload) => payload,
        Err(errors) => {
            let page = integrations_view(&state, &session, form, errors, None, None, None).await?;
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response());
        }
    };

    let created = match state.backend(&session).create_integration(&payload).await.inline()? {
        Ok(created) => created,
        Err(message) => {
            return integrations_view(&state, &session, form, ValidationErrors::new(), Some(message), None, None)
                .await;
        }
    };

    let issued = created.and_then(|integration| {
        integration.agent_token.map(|token| IssuedToken {
            name: integration.name,
            token,
        })
    });
    match issued {
        Some(issued) => {
            let form = IntegrationForm {
                integration_type: IntegrationType::Agent.to_string(),
                ..Default::default()
            };
            let notice = notice_text(Some("integration-created"));
            integrations_view(&state, &session, form, ValidationErrors::new(), None, notice, Some(issued)).await
        }
        None => Ok(Redirect::to("/integrations?notice=integration-created").into_response()),
    }
}

// Users

#[derive(Template)]
#[template(path = "users.html")]
struct UsersTemplate {
    username: String,
    active: &'static str,
    error: Option<String>,
    notice: Option<&'static str>,
    users: Page<User>,
    role_options: Vec<SelectOption>,
    status_options: Vec<SelectOption>,
    q: String,
    filter_query: String,
    can_manage: bool,
}

pub async fn users_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(filter): Query<UserFilter>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    users_view(&state, &session, filter, notice_text(notice.notice.as_deref()), None).await
}

async fn users_view(
    state: &AppState,
    session: &Session,
    filter: UserFilter,
    notice: Option<&'static str>,
    action_error: Option<String>,
) -> PageResult {
    let (users, error) = match state.backend(session).list_users().await.inline()? {
        Ok(users) => (users, action_error),
        Err(message) => (Vec::new(), Some(message)),
    };

    let role = filter.role.clone().unwrap_or_default();
    let status = filter.status.clone().unwrap_or_default();
    let q = filter.q.clone().unwrap_or_default();
    let filtered = filter_users(users, &filter);

    Ok(render(&UsersTemplate {
        username: session.username.clone(),
        active: "users",
        error,
        notice,
        users: paginate(filtered, filter.page, state.config.display.page_size),
        role_options: enum_options(Role::ALL, &role),
        status_options: enum_options(UserStatus::ALL, &status),
        filter_query: query_string(&[("role", &role), ("status", &status), ("q", &q)]),
        q,
        // Without a loaded profile the backend is left to decide.
        can_manage: session.role.is_none() || session.is_admin(),
    }))
}

#[derive(Template)]
#[template(path = "user_form.html")]
struct UserFormTemplate {
    username: String,
    active: &'static str,
    title: &'static str,
    action: String,
    creating: bool,
    form: UserForm,
    errors: ValidationErrors,
    error: Option<String>,
    role_options: Vec<SelectOption>,
}

impl UserFormTemplate {
    fn new(session: &Session, creating: bool, action: String, form: UserForm) -> Self {
        Self {
            username: session.username.clone(),
            active: "users",
            title: if creating { "New user" } else { "Edit user" },
            action,
            creating,
            role_options: enum_options(Role::ALL, &form.role),
            form,
            errors: ValidationErrors::new(),
            error: None,
        }
    }
}

pub async fn new_user_page(Extension(session): Extension<Arc<Session>>) -> Response {
    let form = UserForm {
        role: Role::default().to_string(),
        ..Default::default()
    };
    render(&UserFormTemplate::new(&session, true, "/users/new".to_string(), form))
}

pub async fn create_user_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Form(form): Form<UserForm>,
) -> PageResult {
    let action = "/users/new".to_string();
    let payload = match form.validate(true) {
        Ok(payload) => payload,
        Err(errors) => {
            let mut template = UserFormTemplate::new(&session, true, action, form);
            template.errors = errors;
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, render(&template)).into_response());
        }
    };

    match state.backend(&session).create_user(&payload).await.inline()? {
        Ok(_) => Ok(Redirect::to("/users?notice=user-created").into_response()),
        Err(message) => {
            let mut template = UserFormTemplate::new(&session, true, action, form);
            template.error = Some(message);
            Ok(render(&template))
        }
    }
}

pub async fn edit_user_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    let action = format!("/users/{}/edit", urlencoding::encode(&id));
    let template = match state.backend(&session).get_user(&id).await.inline()? {
        Ok(user) => UserFormTemplate::new(&session, false, action, UserForm::from_user(&user)),
        Err(message) => {
            let mut template = UserFormTemplate::new(&session, false, action, UserForm::default());
            template.error = Some(message);
            template
        }
    };
    Ok(render(&template))
}

pub async fn update_user_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
    Form(form): Form<UserForm>,
) -> PageResult {
    let action = format!("/users/{}/edit", urlencoding::encode(&id));
    let payload = match form.validate(false) {
        Ok(payload) => payload,
        Err(errors) => {
            let mut template = UserFormTemplate::new(&session, false, action, form);
            template.errors = errors;
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, render(&template)).into_response());
        }
    };

    match state.backend(&session).update_user(&id, &payload).await.inline()? {
        Ok(_) => Ok(Redirect::to("/users?notice=user-updated").into_response()),
        Err(message) => {
            let mut template = UserFormTemplate::new(&session, false, action, form);
            template.error = Some(message);
            Ok(render(&template))
        }
    }
}

async fn set_status(state: &AppState, session: &Session, id: &str, status: UserStatus) -> PageResult {
    match state.backend(session).set_user_status(id, status).await.inline()? {
        Ok(()) => {
            let notice = match status {
                UserStatus::Block => "user-blocked",
                _ => "user-unblocked",
            };
            Ok(Redirect::to(&format!("/users?notice={}", notice)).into_response())
        }
        Err(message) => users_view(state, session, UserFilter::default(), None, Some(message)).await,
    }
}

pub async fn block_user_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    set_status(&state, &session, &id, UserStatus::Block).await
}

pub async fn unblock_user_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    set_status(&state, &session, &id, UserStatus::Active).await
}

pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(id): Path<String>,
) -> PageResult {
    match state.backend(&session).delete_user(&id).await.inline()? {
        Ok(()) => {
            info!("{} removed user {}", session.username, id);
            Ok(Redirect::to("/users?notice=user-deleted").into_response())
        }
        Err(message) => users_view(&state, &session, UserFilter::default(), None, Some(message)).await,
    }
}

// Reports

#[derive(Template)]
#[template(path = "reports.html")]
struct ReportsTemplate {
    username: String,
    active: &'static str,
    errors: Vec<String>,
    from: String,
    to: String,
    system_options: Vec<SelectOption>,
    rows: Vec<ReportRow>,
    rollup: ReportRollup,
    incidents: Vec<Incident>,
    chart_json: String,
    export_query: String,
}

/// The report window with defaults applied from the display config.
pub(crate) fn report_window(state: &AppState, query: &ReportQuery) -> ReportQuery {
    query.resolved(Utc::now().date_naive(), state.config.display.report_days)
}

pub async fn reports_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Query(query): Query<ReportQuery>,
) -> PageResult {
    let query = report_window(&state, &query);
    let backend = state.backend(&session);
    let (report, systems) = tokio::join!(backend.fetch_report(&query), backend.list_systems());

    let mut errors = Vec::new();
    let report = keep(report.inline()?, &mut errors);
    let systems = keep(systems.inline()?, &mut errors);

    let from = query.from.map(|d| d.to_string()).unwrap_or_default();
    let to = query.to.map(|d| d.to_string()).unwrap_or_default();
    let system_id = query.system_id.clone().unwrap_or_default();

    Ok(render(&ReportsTemplate {
        username: session.username.clone(),
        active: "reports",
        errors,
        system_options: system_options(&systems, &system_id),
        rows: metrics::report_rows(&report),
        rollup: metrics::report_rollup(&report),
        incidents: metrics::incident_list(&report),
        chart_json: script_json(&metrics::availability_series(&report)),
        export_query: query_string(&[("from", &from), ("to", &to), ("system_id", &system_id)]),
        from,
        to,
    }))
}

// Map

#[derive(Template)]
#[template(path = "map.html")]
struct MapTemplate {
    username: String,
    active: &'static str,
    error: Option<String>,
    markers_json: String,
    tile_url_json: String,
    placed: usize,
    unplaced: usize,
}

pub async fn map_page(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> PageResult {
    let (systems, error) = match state.backend(&session).list_systems().await.inline()? {
        Ok(systems) => (systems, None),
        Err(message) => (Vec::new(), Some(message)),
    };
    let markers = metrics::map_markers(&systems);
    Ok(render(&MapTemplate {
        username: session.username.clone(),
        active: "map",
        error,
        markers_json: script_json(&markers),
        tile_url_json: script_json(&state.config.display.map_tile_url),
        placed: markers.len(),
        unplaced: systems.len() - markers.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::create_app;
    use crate::handlers::test_support::*;
    use crate::services::test_support::spawn_backend;
    use axum::http::header;
    use axum::routing::{get, patch, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[test]
    fn test_query_string_skips_empty_and_encodes() {
        assert_eq!(
            query_string(&[("status", "up"), ("q", "web 1&2"), ("role", "")]),
            "status=up&q=web%201%262&"
        );
    }

    #[test]
    fn test_script_json_escapes_closing_tags() {
        assert_eq!(script_json("</script>"), "\"<\\/script>\"");
    }

    #[test]
    fn test_enum_options_marks_selection() {
        let options = enum_options(IntegrationType::ALL, "external_api");
        assert!(!options[0].selected);
        assert!(options[1].selected);
        assert_eq!(options[1].label, "external api");
    }

    #[tokio::test]
    async fn test_login_sets_session_cookie() {
        let backend = Router::new()
            .route(
                "/auth/signin",
                post(|| async { Json(json!({"success": true, "data": {"access_token": "abc", "refresh_token": "r"}})) }),
            )
            .route(
                "/auth/me",
                get(|| async { Json(json!({"id": 1, "username": "ops", "role": "admin"})) }),
            );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let app = create_app(state.clone());

        let response = app
            .oneshot(post_form("/login", None, "identifier=ops&password=secret123"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("infrawatch_session="));
        assert!(cookie.contains("HttpOnly"));
        assert_eq!(state.auth.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_login_rejected_renders_inline_error() {
        let backend = Router::new().route(
            "/auth/signin",
            post(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad password"}))) }),
        );
        let base = spawn_backend(backend).await;
        let app = create_app(test_state(&base));

        let response = app
            .oneshot(post_form("/login", None, "identifier=ops&password=wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_text(response).await;
        assert!(body.contains("Invalid credentials"));
        assert!(body.contains("value=\"ops\""));
    }

    #[tokio::test]
    async fn test_invalid_system_form_never_reaches_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend = Router::new().route(
            "/systems",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Json(json!({})) }
            }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let body = "name=web&system_type=server&connection_type=api&criticality_level=high\
                    &status=up&sla_target=150&check_interval=60&target=https%3A%2F%2Fweb.local";
        let response = app
            .oneshot(post_form("/systems/new", Some(&cookie), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("must be between 0 and 100"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_system_form_creates_and_redirects() {
        let backend = Router::new().route(
            "/systems",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["sla_target"], json!(99.5));
                assert_eq!(body["type"], json!("server"));
                Json(json!({"success": true, "data": {"id": 9, "name": "web", "connection_type": "api"}}))
            }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let body = "name=web&system_type=server&connection_type=api&criticality_level=high\
                    &status=up&sla_target=99.5&check_interval=60&target=https%3A%2F%2Fweb.local";
        let response = app
            .oneshot(post_form("/systems/new", Some(&cookie), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/systems?notice=system-created");
    }

    #[tokio::test]
    async fn test_agent_token_shown_once_after_creation() {
        let token = "agt_7f3c9a1d2e4b";
        let backend = Router::new().route(
            "/integrations",
            get(move || async move {
                Json(json!([{"id": 4, "name": "dc1", "type": "agent", "agent_token": token}]))
            })
            .post(move || async move {
                Json(json!({"success": true, "data": {"id": 4, "name": "dc1", "type": "agent", "agent_token": token}}))
            }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let response = create_app(state.clone())
            .oneshot(post_form("/integrations", Some(&cookie), "name=dc1&integration_type=agent"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_text(response).await;
        assert!(page.contains(token));
        assert!(page.contains("shown only once"));

        let response = create_app(state)
            .oneshot(get_with_cookie("/integrations", &cookie))
            .await
            .unwrap();
        let page = body_text(response).await;
        assert!(!page.contains(token));
        assert!(page.contains("********2e4b"));
    }

    #[tokio::test]
    async fn test_acknowledged_integration_redirects() {
        let backend = Router::new().route(
            "/integrations",
            post(|| async { Json(json!({"success": true, "message": "created"})) }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        let body = "name=crm&integration_type=external_api&api_url=https%3A%2F%2Fcrm.local&api_key=k";
        let response = create_app(state)
            .oneshot(post_form("/integrations", Some(&cookie), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/integrations?notice=integration-created");
    }

    #[tokio::test]
    async fn test_malformed_page_falls_back_to_first() {
        let backend = Router::new().route(
            "/systems",
            get(|| async { Json(json!([{"id": 1, "name": "web", "connection_type": "api"}])) }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");

        for uri in ["/systems?page=abc", "/systems?page=", "/alerts?page=-2"] {
            let response = create_app(state.clone())
                .oneshot(get_with_cookie(uri, &cookie))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    fn users_backend() -> Router {
        Router::new().route(
            "/users",
            get(|| async {
                Json(json!([
                    {"id": 1, "username": "alice", "email": "alice@example.com", "role": "admin", "status": "active"},
                    {"id": 2, "username": "bob", "email": "bob@example.com", "role": "viewer", "status": "active"},
                    {"id": 3, "username": "carol", "email": "carol@example.com", "role": "admin", "status": "block"}
                ]))
            }),
        )
    }

    #[tokio::test]
    async fn test_users_page_filters_by_role() {
        let base = spawn_backend(users_backend()).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let response = app
            .oneshot(get_with_cookie("/users?role=admin", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("alice@example.com"));
        assert!(body.contains("carol@example.com"));
        assert!(!body.contains("bob@example.com"));
    }

    #[tokio::test]
    async fn test_block_user_patches_status() {
        let backend = users_backend().route(
            "/users/:id",
            patch(|axum::extract::Path(id): axum::extract::Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(id, "2");
                assert_eq!(body, json!({"status": "block"}));
                Json(json!({"success": true}))
            }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let response = app
            .oneshot(post_form("/users/2/block", Some(&cookie), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/users?notice=user-blocked");
    }

    #[tokio::test]
    async fn test_backend_error_is_shown_inline() {
        let backend = Router::new().route(
            "/systems",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "database offline"}))) }),
        );
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let response = app
            .oneshot(get_with_cookie("/systems", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("database offline"));
    }

    #[tokio::test]
    async fn test_reports_page_with_no_systems() {
        let backend = Router::new()
            .route("/reports", get(|| async { Json(json!({"systems": []})) }))
            .route("/systems", get(|| async { Json(json!([])) }));
        let base = spawn_backend(backend).await;
        let state = test_state(&base);
        let cookie = signed_in(&state, "t");
        let app = create_app(state);

        let response = app
            .oneshot(get_with_cookie("/reports?from=2026-09-01&to=2026-09-30", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("value=\"2026-09-01\""));
        assert!(body.contains("No report data for this period"));
    }
}
