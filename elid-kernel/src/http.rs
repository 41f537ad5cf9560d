/**
 * API REST ELID - Serveur HTTP principal du kernel
 *
 * RÔLE :
 * Expose le CRUD des équipements, le journal des transactions et la surface
 * de contrôle Activate/Deactivate du superviseur.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth (Bearer JWT ou x-api-key) + CORS
 * - Routes : /health, /auth/login, /system/health, /api/devices, /api/transactions
 * - Erreurs métier -> codes HTTP + corps JSON {"error": ...}
 *
 * SÉCURITÉ :
 * - Authorization: Bearer <jwt> ou x-api-key obligatoire sauf /health et /auth/login
 * - Aucun secret ni clé configuré = accès refusé
 * - CORS limité aux origines de http.cors_origins (frontend de dev par défaut)
 */

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::activation::{Activation, ActivationError, ActivationSupervisor};
use crate::auth::{AuthError, Authenticator};
use crate::gateway::{GatewayError, SharedGateway};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{Device, DeviceId, NewDevice, Transaction};

const DEFAULT_TX_LIMIT: usize = 50;
const MAX_TX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub gateway: SharedGateway,
    pub supervisor: Arc<ActivationSupervisor>,
    pub health_tracker: HealthTracker,
    pub auth: Authenticator,
    pub cors_origins: Vec<String>,
}

/// Erreur HTTP standardisée : code + {"error": message}
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<ActivationError> for ApiError {
    fn from(e: ActivationError) -> Self {
        if e.is_client_error() {
            tracing::debug!(label = e.as_label(), "[http] rejected: {e}");
        }
        match e {
            ActivationError::InvalidInput(_) => ApiError::new(StatusCode::BAD_REQUEST, "bad id"),
            ActivationError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "device not found"),
            ActivationError::ShuttingDown => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
            }
            ActivationError::Internal(inner) => inner.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        tracing::error!(label = e.as_label(), "[http] store error: {e}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        tracing::debug!(label = e.as_label(), "[http] auth rejected: {e}");
        match e {
            AuthError::NotConfigured => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "auth not configured"),
            AuthError::MissingCredentials => ApiError::new(StatusCode::BAD_REQUEST, "invalid payload"),
            AuthError::InvalidToken(_) => ApiError::new(StatusCode::UNAUTHORIZED, "invalid token"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(serde::Serialize)]
struct DeviceView {
    #[serde(flatten)]
    device: Device,
    active: bool, // générateur en cours (registre), pas le statut stocké
}

#[derive(Debug, Deserialize)]
struct TransactionsParams {
    limit: Option<String>,
}

/// Limite demandée si valide (1..=500), sinon la valeur par défaut
fn tx_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.parse::<usize>().ok())
        .filter(|n| (1..=MAX_TX_LIMIT).contains(n))
        .unwrap_or(DEFAULT_TX_LIMIT)
}

fn parse_id(raw: &str) -> Result<DeviceId, ApiError> {
    raw.parse::<DeviceId>()
        .map_err(|e| ActivationError::from(e).into())
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Routes accessibles sans authentification
fn is_public(path: &str) -> bool {
    matches!(path, "/health" | "/auth/login")
}

async fn require_auth(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_public(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if app.auth.is_closed() {
        tracing::warn!("[http] SECURITY: neither JWT_SECRET nor ELID_API_KEY set - API access denied");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "authentication not configured"));
    }

    let headers = req.headers();
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if app.auth.api_key_matches(key) {
            return Ok(next.run(req).await);
        }
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid api key"));
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = bearer else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };
    let claims = app.auth.verify(token.trim()).map_err(|e| match e {
        AuthError::NotConfigured => ApiError::new(StatusCode::UNAUTHORIZED, "invalid token"),
        other => ApiError::from(other),
    })?;
    tracing::debug!(subject = %claims.sub, "[http] bearer accepted");
    Ok(next.run(req).await)
}

/// CORS du frontend : origines explicites, en-têtes d'auth autorisés
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("[http] ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
}

pub fn build_router(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.cors_origins);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/login", post(login))
        .route("/system/health", get(get_system_health))
        .route("/api/devices", get(list_devices).post(create_device))
        .route("/api/devices/{id}/toggle", post(toggle_device))
        .route("/api/devices/{id}/activate", post(activate_device))
        .route("/api/devices/{id}/deactivate", post(deactivate_device))
        .route("/api/transactions", get(list_transactions))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .layer(cors) // externe : répond aux preflight avant l'auth
        .with_state(app_state)
}

// POST /auth/login (démo : tout couple non vide reçoit un jeton)
async fn login(
    State(app): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AuthError::MissingCredentials.into());
    }
    let token = app.auth.issue(req.email.trim())?;
    tracing::info!("[http] token issued for {}", req.email.trim());
    Ok(Json(json!({ "token": token })))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.gateway, &app.supervisor).await)
}

// GET /api/devices
async fn list_devices(State(app): State<AppState>) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = app.gateway.list_devices().await?;
    let views = devices
        .into_iter()
        .map(|device| DeviceView {
            active: app.supervisor.is_active(device.id),
            device,
        })
        .collect();
    Ok(Json(views))
}

// POST /api/devices
async fn create_device(
    State(app): State<AppState>,
    Json(req): Json<NewDevice>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "name required"));
    }
    let id = app.gateway.create_device(&req).await?;
    tracing::info!(device = %id, "[http] device created: {}", req.name);
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

// POST /api/devices/{id}/toggle
async fn toggle_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    match app.gateway.toggle_lock(id).await? {
        Some(is_locked) => Ok(Json(json!({ "is_locked": is_locked }))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "not found")),
    }
}

// POST /api/devices/{id}/activate
async fn activate_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = parse_id(&id)?;
    let outcome = app.supervisor.activate(id).await?;
    let code = match outcome {
        Activation::Activated => StatusCode::ACCEPTED,
        Activation::AlreadyActive => StatusCode::OK,
    };
    Ok((code, Json(json!({ "status": outcome.as_status() }))))
}

// POST /api/devices/{id}/deactivate
async fn deactivate_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = app.supervisor.deactivate(id).await?;
    Ok(Json(json!({ "status": outcome.as_status() })))
}

// GET /api/transactions?limit=N
async fn list_transactions(
    State(app): State<AppState>,
    Query(params): Query<TransactionsParams>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let limit = tx_limit(params.limit.as_deref());
    Ok(Json(app.gateway.list_transactions(limit).await?))
}
