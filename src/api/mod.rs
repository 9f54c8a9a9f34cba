//! Deploy API: the HTTP surface consumed by operator CLIs and UIs.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::{AppController, CatalogView, ReloadSummary, ServiceSettings};
use crate::domain::{
    DeployError, DeploymentRecord, DomainError, ResolutionError, ResolvedConfig, ServiceWiring,
    TargetRecord, WiringBinding,
};
use crate::ports::{Principal, SCOPE_ADMIN, SCOPE_DEPLOY, SCOPE_READ};

type ApiState = Arc<AppController>;
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the Deploy API router.
pub fn router(controller: Arc<AppController>) -> Router {
    Router::new()
        .route("/catalog", get(catalog))
        .route("/reload", post(reload))
        .route("/wiring", get(list_wiring))
        .route(
            "/wiring/:service/:capability",
            put(set_binding).delete(remove_binding),
        )
        .route("/targets", get(list_targets).put(put_target))
        .route("/:service/status", get(status))
        .route("/:service/activate", post(activate))
        .route("/:service/deactivate", post(deactivate))
        .route("/:service/validate", get(validate))
        .route("/:service/config", get(resolved_config))
        .route("/:service/settings", get(get_settings).put(put_settings))
        .layer(middleware::from_fn_with_state(
            controller.clone(),
            authenticate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

/// Error returned by every handler, rendered as `{ "error": kind, "message": ... }`.
#[derive(Debug)]
pub struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
            DomainError::Resolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::Deploy(DeployError::Rejected(_)) => StatusCode::BAD_REQUEST,
            DomainError::Deploy(DeployError::QuotaExceeded(_)) => StatusCode::TOO_MANY_REQUESTS,
            DomainError::Deploy(DeployError::PlatformUnreachable(_)) => StatusCode::BAD_GATEWAY,
            DomainError::Deploy(DeployError::Cancelled(_)) => StatusCode::GATEWAY_TIMEOUT,
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
            DomainError::Config(_)
            | DomainError::Configuration(_)
            | DomainError::Serialization(_) => StatusCode::BAD_REQUEST,
            DomainError::StateTransition { .. } => StatusCode::CONFLICT,
            DomainError::NetworkBlocked { .. }
            | DomainError::HttpRequest(_)
            | DomainError::Io(_)
            | DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> String {
        match &self.0 {
            DomainError::Resolution(e) => format!("{:?}", e.kind()),
            DomainError::Deploy(e) => format!("{:?}", e.kind()),
            DomainError::NotFound { .. } => "NotFound".to_string(),
            DomainError::Unauthorized(_) => "Unauthorized".to_string(),
            DomainError::Forbidden(_) => "Forbidden".to_string(),
            DomainError::Config(_) | DomainError::Configuration(_) => "Configuration".to_string(),
            DomainError::StateTransition { .. } => "StateTransition".to_string(),
            _ => "Internal".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, status = status.as_u16(), "Request failed");
        }
        let body = json!({ "error": self.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Validate the bearer token and attach the principal to the request.
async fn authenticate(
    State(controller): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let principal = controller.authenticate(token)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

fn require(principal: &Principal, scope: &str) -> Result<(), ApiError> {
    if principal.has_scope(scope) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!("principal {} lacks scope '{}'", principal.id, scope)).into())
    }
}

#[derive(Debug, Deserialize)]
struct TargetQuery {
    target: String,
}

#[derive(Debug, Deserialize)]
struct BindingBody {
    provider: String,
}

/// One unmet requirement reported by `validate`.
#[derive(Debug, Serialize)]
struct Missing {
    kind: String,
    message: String,
}

impl From<&ResolutionError> for Missing {
    fn from(err: &ResolutionError) -> Self {
        Missing {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Validation {
    service: String,
    target: String,
    valid: bool,
    missing: Vec<Missing>,
}

/// Capabilities, providers with availability, services and load errors.
async fn catalog(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<CatalogView> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.catalog()))
}

/// Re-read descriptors and secrets.
async fn reload(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<ReloadSummary> {
    require(&principal, SCOPE_ADMIN)?;
    info!(principal = %principal.id, "Catalog reload requested");
    Ok(Json(controller.reload()?))
}

/// Deployment records of a service, one per target.
async fn status(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> ApiResult<Vec<DeploymentRecord>> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.status(&service)?))
}

/// Resolve and deploy a service onto a target.
async fn activate(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<DeploymentRecord> {
    require(&principal, SCOPE_DEPLOY)?;
    info!(principal = %principal.id, service = %service, target = %query.target, "Activate requested");
    Ok(Json(controller.activate(&service, &query.target).await?))
}

/// Stop every deployment of a service.
async fn deactivate(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> ApiResult<Vec<DeploymentRecord>> {
    require(&principal, SCOPE_DEPLOY)?;
    info!(principal = %principal.id, service = %service, "Deactivate requested");
    Ok(Json(controller.deactivate(&service).await?))
}

/// Every missing capability, credential or infrastructure dependency.
async fn validate(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Validation> {
    require(&principal, SCOPE_READ)?;
    let errors = controller.validate(&service, &query.target).await?;
    Ok(Json(Validation {
        service,
        target: query.target,
        valid: errors.is_empty(),
        missing: errors.iter().map(Missing::from).collect(),
    }))
}

/// Resolved environment with secrets masked.
async fn resolved_config(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<ResolvedConfig> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.resolved_config(&service, &query.target).await?))
}

async fn get_settings(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> ApiResult<ServiceSettings> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.settings(&service)?))
}

async fn put_settings(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Json(settings): Json<ServiceSettings>,
) -> Result<StatusCode, ApiError> {
    require(&principal, SCOPE_DEPLOY)?;
    info!(principal = %principal.id, service = %service, "Settings updated");
    controller.put_settings(&service, settings)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_wiring(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<std::collections::BTreeMap<String, ServiceWiring>> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.wiring()?))
}

/// Bind `(service, capability)` to a provider.
async fn set_binding(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path((service, capability)): Path<(String, String)>,
    Json(body): Json<BindingBody>,
) -> Result<StatusCode, ApiError> {
    require(&principal, SCOPE_DEPLOY)?;
    info!(principal = %principal.id, service = %service, capability = %capability, provider = %body.provider, "Binding requested");
    controller
        .set_binding(WiringBinding {
            service,
            capability,
            provider: body.provider,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_binding(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path((service, capability)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    require(&principal, SCOPE_DEPLOY)?;
    if controller.remove_binding(&service, &capability).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(DomainError::not_found("binding", format!("{}.{}", service, capability)).into())
    }
}

async fn list_targets(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Vec<TargetRecord>> {
    require(&principal, SCOPE_READ)?;
    Ok(Json(controller.targets()?))
}

async fn put_target(
    State(controller): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(record): Json<TargetRecord>,
) -> Result<StatusCode, ApiError> {
    require(&principal, SCOPE_ADMIN)?;
    info!(principal = %principal.id, target = %record.id, "Target record updated");
    controller.put_target(record)?;
    Ok(StatusCode::NO_CONTENT)
}
