//! REST API layer for the portal using Axum (port 11111 by default)
//!
//! Public routes: health and login. Everything else needs a bearer token
//! whose backend session is still open; each handler then checks the
//! caller's role against the view it serves.

use axum::{
    extract::{Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::{can_access, dashboard_for, navigation, View};
use crate::assignment::{self, AssignOutcome, OccupantView, RoomFilter, RoomView};
use crate::auth::{create_jwt, validate_jwt};
use crate::config::Config;
use crate::dashboard::{self, Analytics, FinancialSummary, OccupantDashboard};
use crate::error::{PortalError, Result};
use crate::mailer::{EmailJsMailer, LogMailer, Mailer};
use crate::models::{NewRoom, Occupant, Profile, ReportStatus, Role, Room, RoomStatus};
use crate::registration::{register_occupants, OccupantRow, RegistrationSummary};
use crate::reports::{self, FileReport, ReportFilter, ReportView};
use crate::session::Session;
use crate::settings::{self, PasswordChange, ProfileUpdate};
use crate::storage::Storage;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
#[derive(Clone)]
pub struct AppState {
    storage: Arc<Storage>,
    mailer: Arc<dyn Mailer>,
    jwt_secret: Arc<str>,
    token_ttl_secs: u64,
    public_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(storage: Storage, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        Self {
            storage: Arc::new(storage),
            mailer,
            jwt_secret: config.jwt_secret.as_str().into(),
            token_ttl_secs: config.token_ttl_secs,
            public_key: config.public_key.as_deref().map(Into::into),
        }
    }

    /// Picks the EmailJS mailer when its identifiers are configured.
    pub fn from_config(storage: Storage, config: &Config) -> Self {
        let mailer: Arc<dyn Mailer> = match &config.email {
            Some(email) => Arc::new(EmailJsMailer::new(email.clone())),
            None => {
                tracing::warn!(
                    missing = ?Config::missing_email_settings(),
                    "email not configured, credentials will not be delivered"
                );
                Arc::new(LogMailer::new(Config::missing_email_settings()))
            }
        };
        Self::new(storage, mailer, config)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

/// Generic REST response (JSON)
#[derive(Serialize, Deserialize, Debug)]
pub struct RestResponse {
    pub success: bool,
    pub message: String,
}

impl RestResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

#[derive(Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    pub role: Option<Role>,
    pub dashboard: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Option<Role>,
    pub dashboard: String,
    pub navigation: Vec<String>,
}

#[derive(Deserialize, Serialize)]
pub struct RegisterRequest {
    pub occupants: Vec<OccupantRow>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub summary: RegistrationSummary,
}

#[derive(Deserialize, Serialize)]
pub struct AssignRequest {
    pub occupant_id: u64,
}

#[derive(Serialize)]
pub struct AssignResponse {
    pub room: Room,
    #[serde(flatten)]
    pub outcome: AssignOutcome,
}

#[derive(Deserialize, Serialize)]
pub struct MoveRequest {
    pub from_room_id: u64,
    pub to_room_id: u64,
}

#[derive(Serialize)]
pub struct MoveResponse {
    pub from: Room,
    pub to: Room,
    pub displaced: Option<u64>,
}

#[derive(Deserialize, Serialize)]
pub struct StatusRequest {
    pub status: ReportStatus,
}

/// Raw list query; "all" or an empty status means no status filter.
#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
}

fn status_filter<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map(Some)
            .map_err(|_| PortalError::Validation(format!("unknown status filter: {}", s))),
    }
}

async fn api_key_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if let Some(expected) = &state.public_key {
        let presented = req.headers().get("apikey").and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_ref()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> std::result::Result<Response, PortalError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(PortalError::Unauthorized)?;

    let claims = validate_jwt(&state.jwt_secret, token)?;
    if !state.storage.session_active(claims.sid)? {
        return Err(PortalError::Unauthorized);
    }

    req.extensions_mut().insert(Session::from_claims(&claims));
    Ok(next.run(req).await)
}

/// Resolve the caller's role and check it against an allow-list.
fn require(state: &AppState, session: &mut Session, allowed: &[Role]) -> Result<Role> {
    let role = session.role(&state.storage);
    if !can_access(role, allowed) {
        tracing::debug!(email = %session.email, ?role, "access denied");
        return Err(PortalError::Forbidden);
    }
    role.ok_or(PortalError::Forbidden)
}

fn require_view(state: &AppState, session: &mut Session, view: View) -> Result<Role> {
    require(state, session, view.allowed_roles())
}

/// Create Axum router with the portal endpoints
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/logout", post(logout_handler))
        .route("/me", get(me_handler))
        .route("/register", post(register_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/rooms/:room_id/assign", post(assign_handler))
        .route("/rooms/:room_id/remove", post(remove_handler))
        .route("/rooms/:room_id/move-candidates", get(move_candidates_handler))
        .route("/occupants", get(list_occupants_handler))
        .route("/occupants/available", get(available_occupants_handler))
        .route("/occupants/:occupant_id/move", post(move_handler))
        .route("/reports", get(list_reports_handler).post(file_report_handler))
        .route("/reports/:report_id/status", put(change_status_handler))
        .route("/occupant/dashboard", get(occupant_dashboard_handler))
        .route("/finance", get(finance_handler))
        .route("/analytics", get(analytics_handler))
        .route("/settings/profile", get(get_profile_handler).put(save_profile_handler))
        .route("/settings/password", post(change_password_handler))
        .route("/settings/notifications", post(toggle_notifications_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/login", post(login_handler))
        .route("/health", get(health_handler))
        .merge(auth_routes)
        .layer(middleware::from_fn_with_state(state.clone(), api_key_middleware))
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> Json<RestResponse> {
    RestResponse::ok("M2H portal API healthy")
}

async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (identity, sid) = state
        .storage
        .sign_in(&payload.email, &payload.password, state.token_ttl_secs)?;

    let user = match state.storage.get_user(identity.id)? {
        Some(user) => Some(user),
        None => state.storage.find_user_by_email(&identity.email)?,
    };
    let Some(user) = user else {
        state.storage.sign_out(sid)?;
        return Err(PortalError::Backend(
            "User record not found. Please contact support.".into(),
        ));
    };

    let token = create_jwt(&state.jwt_secret, &identity, user.role, sid, state.token_ttl_secs)?;
    tracing::info!(email = %identity.email, role = ?user.role, "signed in");
    Ok(Json(LoginResponse {
        token,
        email: identity.email,
        role: user.role,
        dashboard: dashboard_for(user.role).map_or("/", |v| v.path()).to_string(),
    }))
}

async fn logout_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<RestResponse>> {
    session.invalidate(&state.storage)?;
    tracing::info!(email = %session.email, "signed out");
    Ok(RestResponse::ok("Signed out"))
}

async fn me_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Json<MeResponse> {
    let role = session.role(&state.storage);
    Json(MeResponse {
        id: session.identity_id,
        email: session.email.clone(),
        role,
        dashboard: dashboard_for(role).map_or("/", |v| v.path()).to_string(),
        navigation: navigation(role).iter().map(|v| v.path().to_string()).collect(),
    })
}

async fn register_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    require_view(&state, &mut session, View::Register)?;
    let summary =
        register_occupants(state.storage.as_ref(), state.mailer.as_ref(), &payload.occupants)
            .await?;
    Ok(Json(RegisterResponse {
        success: !summary.created.is_empty() || summary.failed.is_empty(),
        message: summary.message(),
        summary,
    }))
}

async fn list_rooms_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RoomView>>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    let filter = RoomFilter {
        status: status_filter::<RoomStatus>(query.status)?,
        search: query.search,
    };
    Ok(Json(assignment::list_rooms(&state.storage, &filter)?))
}

async fn create_room_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Json(payload): Json<NewRoom>,
) -> Result<impl IntoResponse> {
    require(&state, &mut session, &[Role::Admin])?;
    if payload.room_number.trim().is_empty() || payload.building.trim().is_empty() {
        return Err(PortalError::Validation(
            "Room number and building are required".into(),
        ));
    }
    let room = state.storage.insert_room(payload)?;
    tracing::info!(room_id = room.id, label = %room.label(), "room created");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn assign_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Path(room_id): Path<u64>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<AssignResponse>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    let (room, outcome) = assignment::assign(&state.storage, room_id, payload.occupant_id)?;
    Ok(Json(AssignResponse { room, outcome }))
}

async fn remove_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Path(room_id): Path<u64>,
) -> Result<Json<Room>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    Ok(Json(assignment::remove(&state.storage, room_id)?))
}

async fn move_candidates_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Path(room_id): Path<u64>,
) -> Result<Json<Vec<Room>>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    Ok(Json(assignment::move_candidates(&state.storage, room_id)?))
}

async fn move_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Path(occupant_id): Path<u64>,
    Json(payload): Json<MoveRequest>,
) -> Result<Json<MoveResponse>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    let (from, to, outcome) = assignment::move_occupant(
        &state.storage,
        occupant_id,
        payload.from_room_id,
        payload.to_room_id,
    )?;
    Ok(Json(MoveResponse {
        from,
        to,
        displaced: outcome.displaced,
    }))
}

async fn list_occupants_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OccupantView>>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    Ok(Json(assignment::list_occupants(
        &state.storage,
        query.search.as_deref(),
    )?))
}

async fn available_occupants_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<Vec<Occupant>>> {
    require_view(&state, &mut session, View::RoomsOccupants)?;
    Ok(Json(assignment::available_occupants(&state.storage)?))
}

async fn list_reports_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReportView>>> {
    require_view(&state, &mut session, View::Reports)?;
    let filter = ReportFilter {
        status: status_filter::<ReportStatus>(query.status)?,
        search: query.search,
    };
    Ok(Json(reports::list(&state.storage, &filter)?))
}

async fn change_status_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Path(report_id): Path<u64>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<ReportView>> {
    require_view(&state, &mut session, View::Reports)?;
    Ok(Json(reports::change_status(
        &state.storage,
        report_id,
        payload.status,
    )?))
}

async fn file_report_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Json(payload): Json<FileReport>,
) -> Result<impl IntoResponse> {
    require(
        &state,
        &mut session,
        &[Role::Occupant, Role::Admin, Role::StudentAffairs],
    )?;
    let occupant_id = state
        .storage
        .get_user(session.identity_id)?
        .and_then(|u| u.occupant_id);
    let report = reports::file_report(&state.storage, occupant_id, payload)?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn occupant_dashboard_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<OccupantDashboard>> {
    require_view(&state, &mut session, View::OccupantDashboard)?;
    let occupant_id = state
        .storage
        .get_user(session.identity_id)?
        .and_then(|u| u.occupant_id)
        .ok_or_else(|| PortalError::not_found("occupant for user", session.identity_id))?;
    Ok(Json(dashboard::occupant_dashboard(&state.storage, occupant_id)?))
}

async fn finance_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<FinancialSummary>> {
    require_view(&state, &mut session, View::Finance)?;
    Ok(Json(dashboard::financial_summary(&state.storage)?))
}

async fn analytics_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<Analytics>> {
    require_view(&state, &mut session, View::Analytics)?;
    Ok(Json(dashboard::analytics(&state.storage)?))
}

async fn get_profile_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<Profile>> {
    require_view(&state, &mut session, View::Settings)?;
    Ok(Json(settings::load_profile(&state.storage, session.identity_id)?))
}

async fn save_profile_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<Profile>> {
    require_view(&state, &mut session, View::Settings)?;
    Ok(Json(settings::save_profile(
        &state.storage,
        session.identity_id,
        payload,
    )?))
}

async fn toggle_notifications_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Json<Profile>> {
    require_view(&state, &mut session, View::Settings)?;
    Ok(Json(settings::toggle_notifications(
        &state.storage,
        session.identity_id,
    )?))
}

async fn change_password_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    Json(payload): Json<PasswordChange>,
) -> Result<Json<RestResponse>> {
    require_view(&state, &mut session, View::Settings)?;
    settings::change_password(
        &state.storage,
        session.identity_id,
        session.session_id,
        &payload,
    )?;
    Ok(RestResponse::ok("Password updated successfully."))
}
