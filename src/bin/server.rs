use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use pointcount::{
    logging::{self, TracingSink},
    tracker::JiraClient,
    validation::QueryValidation,
    Credentials, EstimationReport, EstimationService, FieldDescriptor, PointCountConfig,
    PointCountError, ReportRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

type AppState = Arc<EstimationService>;

#[derive(Debug, Deserialize)]
struct QueryValidationRequest {
    #[serde(flatten)]
    credentials: Credentials,
    query: String,
}

#[derive(Debug, Deserialize)]
struct FieldValidationRequest {
    #[serde(flatten)]
    credentials: Credentials,
    #[serde(alias = "fieldId")]
    field: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ConfirmationResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct QueryValidationResponse {
    valid: bool,
    primary: Option<String>,
    errors: Vec<String>,
}

impl From<QueryValidation> for QueryValidationResponse {
    fn from(validation: QueryValidation) -> Self {
        Self {
            valid: validation.is_valid(),
            primary: validation.primary().map(str::to_string),
            errors: validation.errors,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
}

struct ApiError(PointCountError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PointCountError::Auth(_) => StatusCode::UNAUTHORIZED,
            PointCountError::FieldNotFound(_) => StatusCode::NOT_FOUND,
            PointCountError::InvalidFieldType { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PointCountError::QueryInvalid(_) | PointCountError::Input(_) => StatusCode::BAD_REQUEST,
            PointCountError::Remote(_) => StatusCode::BAD_GATEWAY,
            PointCountError::Cancelled | PointCountError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            PointCountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let messages = match &self.0 {
            PointCountError::QueryInvalid(errors) => errors.clone(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
            messages,
        };
        (status, Json(body)).into_response()
    }
}

impl From<PointCountError> for ApiError {
    fn from(err: PointCountError) -> Self {
        ApiError(err)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    info!("Starting pointcount server");

    let config = PointCountConfig::from_env();
    info!("Bind address: {}", config.bind_address);
    info!("Tracker base URL: {}", config.tracker_base_url);
    info!("Max concurrent queries: {}", config.max_concurrent_queries);

    let client = JiraClient::new(&config)?;
    let bind_address = config.bind_address.clone();
    let service = EstimationService::new(Arc::new(client), config, Arc::new(TracingSink));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/credentials/check", post(check_credentials))
        .route("/query/validate", post(validate_query))
        .route("/field/validate", post(validate_field))
        .route("/estimation/report", post(compute_report))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn check_credentials(
    State(service): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<ConfirmationResponse>, ApiError> {
    service.check_credentials(&credentials).await?;
    Ok(Json(ConfirmationResponse { ok: true }))
}

async fn validate_query(
    State(service): State<AppState>,
    Json(request): Json<QueryValidationRequest>,
) -> Result<Json<QueryValidationResponse>, ApiError> {
    let validation = service
        .validate_query(&request.credentials, &request.query)
        .await?;
    Ok(Json(validation.into()))
}

async fn validate_field(
    State(service): State<AppState>,
    Json(request): Json<FieldValidationRequest>,
) -> Result<Json<FieldDescriptor>, ApiError> {
    let field = service
        .validate_field(&request.credentials, &request.field)
        .await?;
    Ok(Json(field))
}

async fn compute_report(
    State(service): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<EstimationReport>, ApiError> {
    let report = service.compute_report(&request).await?;
    Ok(Json(report))
}
