use crate::config::ApiConfig;
use crate::credentials::{is_valid_signup, CredentialStore};
use crate::error::ApiError;
use crate::ingest::{parse_coordinate, MediaUpload, PostIngestor, Submission};
use crate::model::{Credentials, Location, Post, User};
use crate::post_index::PostIndex;
use crate::search::{parse_radius_km, SearchService};
use crate::token::{Claims, TokenService};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialStore>,
    pub ingestor: Arc<PostIngestor>,
    pub search: Arc<SearchService>,
    pub index: Arc<dyn PostIndex>,
}

/// Query parameters for nearby search
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lon: String,
    /// Radius in kilometers
    pub range: Option<String>,
}

/// Query parameters for cluster search
#[derive(Debug, Deserialize)]
pub struct ClusterParams {
    /// Numeric post field to filter on
    #[serde(default)]
    pub term: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let gated = Router::new()
        .route("/post", post(create_post))
        .route("/search", get(search_nearby))
        .route("/cluster", get(search_cluster))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .route("/login", post(login))
        .route("/signup", post(signup))
        .merge(gated);

    let prefix = config.prefix.trim_end_matches('/');
    let routes = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    routes
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Reject requests without a valid bearer token before any handler runs
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);

    let claims = match token.map(|t| state.tokens.verify(t)) {
        Some(Ok(claims)) => claims,
        Some(Err(e)) => {
            metrics::counter!("radar.auth.rejected").increment(1);
            debug!(error = %e, "Rejected bearer token");
            return Err(StatusCode::UNAUTHORIZED);
        }
        None => {
            metrics::counter!("radar.auth.rejected").increment(1);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Token from an `Authorization` value; the scheme matches case-insensitively
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "radar-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.index.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "elasticsearch": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "elasticsearch": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Issue a token for valid credentials
#[instrument(skip_all)]
async fn login(State(state): State<AppState>, body: Bytes) -> Result<String, ApiError> {
    info!("Received one login request");

    let credentials: Credentials = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Failed to parse login body");
        ApiError::MalformedJson
    })?;

    state
        .credentials
        .verify(&credentials.username, &credentials.password)
        .await
        .map_err(|e| {
            warn!(username = %credentials.username, error = %e, "Login rejected");
            ApiError::from_login(e)
        })?;

    state.tokens.issue(&credentials.username).map_err(|e| {
        error!(error = %e, "Failed to generate token");
        ApiError::TokenSigningFailed
    })
}

/// Register a new account
#[instrument(skip_all)]
async fn signup(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    info!("Received one signup request");

    let user: User = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Failed to parse signup body");
        ApiError::MalformedJson
    })?;

    if !is_valid_signup(&user) {
        return Err(ApiError::InvalidSignup);
    }

    state.credentials.create(&user).await.map_err(|e| {
        warn!(username = %user.username, error = %e, "Signup rejected");
        ApiError::from_signup(e)
    })?;

    Ok("User added successfully.")
}

/// Ingest a multipart post submission
#[instrument(skip_all, fields(author = %claims.username))]
async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    info!("Received one post request");

    let submission = read_submission(multipart).await?;
    state
        .ingestor
        .ingest(&claims.username, submission)
        .await
        .map_err(|e| {
            error!(stage = e.stage(), error = %e, "Failed to ingest post");
            ApiError::from(e)
        })?;

    Ok(StatusCode::OK)
}

/// Pull `lat`, `lon`, `message` and the `image` file out of the form.
///
/// Only the first `image` part is used.
async fn read_submission(mut multipart: Multipart) -> Result<Submission, ApiError> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Failed to read multipart field");
        ApiError::MalformedForm
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "lat" | "lon" => {
                let raw = field.bytes().await.map_err(|_| ApiError::MalformedForm)?;
                let value = std::str::from_utf8(&raw)
                    .map(parse_coordinate)
                    .unwrap_or(0.0);
                if name == "lat" {
                    submission.location.lat = value;
                } else {
                    submission.location.lon = value;
                }
            }
            "message" => {
                submission.message = field.text().await.map_err(|_| ApiError::MalformedForm)?;
            }
            "image" if submission.media.is_none() => {
                let Some(filename) = field.file_name().map(str::to_owned) else {
                    return Err(ApiError::MediaUnavailable);
                };
                let data = field.bytes().await.map_err(|e| {
                    warn!(error = %e, "Failed to read image part");
                    ApiError::MediaUnavailable
                })?;
                submission.media = Some(MediaUpload { filename, data });
            }
            other => debug!(field = %other, "Ignoring form field"),
        }
    }

    Ok(submission)
}

/// Posts within `range` km of (`lat`, `lon`)
#[instrument(skip(state))]
async fn search_nearby(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Post>>, ApiError> {
    info!("Received one request for search");

    let center = Location::new(parse_coordinate(&params.lat), parse_coordinate(&params.lon));
    let radius_km = parse_radius_km(params.range.as_deref())?;

    let posts = state.search.nearby(center, radius_km).await.map_err(|e| {
        error!(error = %e, "Failed to read post from ElasticSearch");
        ApiError::from(e)
    })?;

    Ok(Json(posts))
}

/// Posts whose `term` field is at least the cluster threshold
#[instrument(skip(state))]
async fn search_cluster(
    State(state): State<AppState>,
    Query(params): Query<ClusterParams>,
) -> Result<Json<Vec<Post>>, ApiError> {
    info!("Received one cluster request");

    let posts = state.search.cluster(&params.term).await.map_err(|e| {
        error!(error = %e, term = %params.term, "Cluster query failed");
        ApiError::from(e)
    })?;

    Ok(Json(posts))
}

/// Start the API server and run until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, prefix = %config.prefix, "Starting radar API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
