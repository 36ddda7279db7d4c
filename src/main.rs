mod config;
mod http;
mod idempotency;
mod listing;
mod metrics;
mod models;
mod security;
mod session;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use listing::{
    HttpProductService, ImageIngestionPipeline, ListingRules, ProductService, SelectedFile,
    SubmissionError, SubmissionPipeline,
    geo::{LocationReport, ReverseGeocoder},
    service::ServiceFailure,
    submission::ValidationError,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, DraftUpdateRequest, Notice, SubmitResponse, WizardResponse};
use security::{AuthContext, AuthState, require_member};
use serde_json::{Value, json};
use chrono::Utc;
use idempotency::MemoryReplayCache;
use session::{SessionHandle, SessionLimits, WizardLimitReached, WizardSessions};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "barter.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let redis = match std::env::var("REDIS_URL") {
        Ok(url) => Some(redis::Client::open(url)?),
        Err(_) => None,
    };
    let state = AppState::from_env(prometheus_handle, redis);
    state.sessions.spawn_sweeper(Duration::from_secs(60));
    let app = router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "barter.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

struct AppState<S> {
    sessions: WizardSessions,
    submission: Arc<SubmissionPipeline<S>>,
    ingestion: ImageIngestionPipeline,
    geocoder: ReverseGeocoder,
    rules: ListingRules,
    openapi: Arc<Value>,
    idempotency: MemoryReplayCache,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            submission: self.submission.clone(),
            ingestion: self.ingestion.clone(),
            geocoder: self.geocoder.clone(),
            rules: self.rules.clone(),
            openapi: self.openapi.clone(),
            idempotency: self.idempotency.clone(),
            prometheus_handle: self.prometheus_handle.clone(),
            redis: self.redis.clone(),
        }
    }
}

impl AppState<HttpProductService> {
    fn from_env(prometheus_handle: PrometheusHandle, redis: Option<redis::Client>) -> Self {
        Self::new(
            HttpProductService::from_env(),
            ReverseGeocoder::from_env(),
            ListingRules::from_env(),
            prometheus_handle,
            redis,
        )
    }
}

impl<S: ProductService> AppState<S> {
    fn new(
        service: S,
        geocoder: ReverseGeocoder,
        rules: ListingRules,
        prometheus_handle: PrometheusHandle,
        redis: Option<redis::Client>,
    ) -> Self {
        let openapi: Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
        Self {
            sessions: WizardSessions::new(SessionLimits::from_env()),
            submission: Arc::new(SubmissionPipeline::new(service, rules.clone())),
            ingestion: ImageIngestionPipeline::new(&rules),
            geocoder,
            rules,
            openapi: Arc::new(openapi),
            idempotency: MemoryReplayCache::new(idempotency::ttl_secs()),
            prometheus_handle,
            redis,
        }
    }
}

fn router<S: ProductService + 'static>(state: AppState<S>, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let wizards = Router::new()
        .route("/", post(mount_wizard::<S>))
        .route("/{id}", get(view_wizard::<S>).delete(teardown_wizard::<S>))
        .route("/{id}/draft", patch(update_draft::<S>))
        .route("/{id}/advance", post(advance_wizard::<S>))
        .route("/{id}/retreat", post(retreat_wizard::<S>))
        .route("/{id}/images", post(upload_images::<S>))
        .route("/{id}/images/{index}", delete(remove_image::<S>))
        .route("/{id}/location", post(report_location::<S>))
        .route("/{id}/submit", post(submit_wizard::<S>))
        .route_layer(middleware::from_fn_with_state(auth, require_member));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint::<S>))
        .route("/openapi.json", get(openapi_json::<S>))
        .route("/docs", get(swagger_ui))
        .nest("/wizards", wizards)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

async fn openapi_json<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized);
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Barter Listing API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn body_limit_from_env() -> usize {
    // Eight 5 MiB images plus multipart framing.
    config::env_usize("REQUEST_MAX_BYTES")
        .filter(|v| *v > 0)
        .unwrap_or(48 * 1024 * 1024)
}

async fn metrics_endpoint<S>(State(state): State<AppState<S>>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn find_session<S>(
    state: &AppState<S>,
    id: Uuid,
    member: &AuthContext,
) -> Result<SessionHandle, AppError> {
    state
        .sessions
        .get(id, &member.user_id)
        .await
        .ok_or(AppError::NotFound)
}

/// Mutation responses leave preview data URLs out; `GET /wizards/{id}` carries them.
async fn respond(handle: &SessionHandle, notices: Vec<Notice>) -> Json<WizardResponse> {
    let wizard = handle.lock().await.view(false);
    Json(WizardResponse { wizard, notices })
}

/// Mount a fresh wizard for the calling member.
///
/// - Method: `POST`
/// - Path: `/wizards`
/// - Response: `201` with `WizardResponse`
async fn mount_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
) -> Result<(StatusCode, Json<WizardResponse>), AppError> {
    metrics::inc_requests("/wizards");
    let handle = state
        .sessions
        .open(&member.user_id, state.rules.clone(), member.premium)
        .await?;
    Ok((StatusCode::CREATED, respond(&handle, Vec::new()).await))
}

async fn view_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<WizardResponse>, AppError> {
    let handle = find_session(&state, id, &member).await?;
    let wizard = handle.lock().await.view(true);
    Ok(Json(WizardResponse {
        wizard,
        notices: Vec::new(),
    }))
}

async fn teardown_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    metrics::inc_requests("/wizards/{id}:delete");
    if state.sessions.close(id, &member.user_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

/// Apply one or a batch of field updates.
///
/// - Method: `PATCH`
/// - Path: `/wizards/{id}/draft`
/// - Body: `{"field": .., "value": ..}` or `{"updates": [..]}`
///
/// Rejected fields come back as warning notices; the others still apply.
async fn update_draft<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<DraftUpdateRequest>,
) -> Result<Json<WizardResponse>, AppError> {
    metrics::inc_requests("/wizards/{id}/draft");
    let handle = find_session(&state, id, &member).await?;
    let notices = handle.lock().await.set_fields(request.into_updates());
    Ok(respond(&handle, notices).await)
}

async fn advance_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<WizardResponse>, AppError> {
    let handle = find_session(&state, id, &member).await?;
    handle.lock().await.advance();
    Ok(respond(&handle, Vec::new()).await)
}

async fn retreat_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<WizardResponse>, AppError> {
    let handle = find_session(&state, id, &member).await?;
    handle.lock().await.retreat();
    Ok(respond(&handle, Vec::new()).await)
}

/// Add a file selection to the wizard.
///
/// - Method: `POST`
/// - Path: `/wizards/{id}/images`
/// - Body: `multipart/form-data`, every file part is considered
///
/// Previews decode in the background; `pending_previews` counts the ones not ready yet.
async fn upload_images<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<WizardResponse>, AppError> {
    metrics::inc_requests("/wizards/{id}/images");
    let handle = find_session(&state, id, &member).await?;

    let mut selection = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request("invalid_multipart", err.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request("invalid_multipart", err.body_text()))?;
        selection.push(SelectedFile {
            name,
            mime_type,
            bytes: bytes.to_vec(),
        });
    }

    let outcome = session::ingest_images(&handle, &state.ingestion, selection).await;
    metrics::images_ingested(outcome.accepted, outcome.notices.len());
    Ok(respond(&handle, outcome.notices).await)
}

async fn remove_image<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<WizardResponse>, AppError> {
    let handle = find_session(&state, id, &member).await?;
    if !handle.lock().await.remove_image(index) {
        return Err(AppError::bad_request(
            "image_not_found",
            format!("no image at index {index}"),
        ));
    }
    Ok(respond(&handle, Vec::new()).await)
}

/// Report the device geolocation result.
///
/// - Method: `POST`
/// - Path: `/wizards/{id}/location`
/// - Body: `{"latitude": .., "longitude": ..}` or `{"error": "permission_denied"}`
async fn report_location<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(report): Json<LocationReport>,
) -> Result<Json<WizardResponse>, AppError> {
    metrics::inc_requests("/wizards/{id}/location");
    let handle = find_session(&state, id, &member).await?;
    let notices = session::apply_location(&handle, &state.geocoder, report).await;
    Ok(respond(&handle, notices).await)
}

/// Validate and submit the draft to the product backend.
///
/// - Method: `POST`
/// - Path: `/wizards/{id}/submit`
/// - Headers: optional `Idempotency-Key`; a replay returns the first response
/// - Response: `SubmitResponse` with the dashboard link to navigate to
async fn submit_wizard<S: ProductService>(
    State(state): State<AppState<S>>,
    Extension(member): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SubmitResponse>, AppError> {
    metrics::inc_requests("/wizards/{id}/submit");
    info!(
        target = "barter.api",
        user_id = %member.user_id,
        api_key = %member.api_key_id,
        wizard_id = %id,
        "submission requested"
    );

    let replay_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|key| idempotency::cache_key(&member.user_id, &id.to_string(), key));

    if let Some(key) = &replay_key {
        let cached = match &state.redis {
            Some(client) => idempotency::redis_get(client, key).await,
            None => state.idempotency.get(key, Utc::now()).await,
        };
        if let Some(existing) = cached {
            return Ok(Json(existing));
        }
    }

    let handle = find_session(&state, id, &member).await?;
    let outcome = session::submit(&state.sessions, &handle, state.submission.as_ref()).await?;
    let response = SubmitResponse {
        product: outcome.receipt.product,
        navigate_to: outcome.navigate_to,
        notices: vec![Notice::success("Product created successfully!")],
        stages: outcome.receipt.stages,
    };

    if let Some(key) = replay_key {
        match &state.redis {
            Some(client) => {
                idempotency::redis_set(client, &key, &response, idempotency::ttl_secs()).await;
            }
            None => {
                state
                    .idempotency
                    .insert(key, response.clone(), Utc::now())
                    .await;
            }
        }
    }
    Ok(Json(response))
}

#[derive(Debug, Error)]
enum AppError {
    #[error("wizard not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{detail}")]
    BadRequest { code: &'static str, detail: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a submission is already in progress")]
    InFlight,
    #[error(transparent)]
    TooManyWizards(#[from] WizardLimitReached),
    #[error("{0}")]
    Service(ServiceFailure),
}

impl AppError {
    fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            detail: detail.into(),
        }
    }
}

impl From<SubmissionError> for AppError {
    fn from(value: SubmissionError) -> Self {
        match value {
            SubmissionError::Validation(err) => Self::Validation(err),
            SubmissionError::InFlight => Self::InFlight,
            SubmissionError::Service(failure) => Self::Service(failure),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "wizard_not_found", self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::BadRequest { code, detail } => (StatusCode::BAD_REQUEST, *code, detail.clone()),
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.code(), err.to_string()),
            AppError::InFlight => (StatusCode::CONFLICT, "submission_in_flight", self.to_string()),
            AppError::TooManyWizards(err) => {
                (StatusCode::TOO_MANY_REQUESTS, "wizard_limit_reached", err.to_string())
            }
            AppError::Service(failure) => {
                warn!(target = "barter.api", status = ?failure.status, "product service failure surfaced to client");
                (StatusCode::BAD_GATEWAY, "product_service_failed", failure.message())
            }
        };
        let payload = ApiError {
            error: code.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
