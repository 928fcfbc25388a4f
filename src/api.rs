//! HTTP surface: routes, JSON error mapping and the visitor cookie middleware.
//!
//! Store and upstream calls are blocking, so every handler hops onto the
//! blocking pool before touching them.

use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Query, Request, State, rejection::QueryRejection},
    http::{HeaderName, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::ingest::{IngestError, Ingestor};
use crate::models::{DailyVisits, HalfHourVisits, PlaylistItem, VideoRecord};
use crate::picker::{DailyPicker, EXCEEDED_MESSAGE, Pick, PickError};
use crate::store::{HealthReport, StoreError, VideoStore};
use crate::visitor::{COOKIE_MAX_AGE_DAYS, VISITOR_COOKIE, Visitor, VisitorTracker};

pub const API_PREFIX: &str = "/api/v1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VideoStore>,
    pub ingestor: Arc<Ingestor>,
    pub picker: Arc<DailyPicker>,
    pub visitors: Arc<VisitorTracker>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Fresh rotation and visitor state around an already opened store.
    pub fn new(store: Arc<VideoStore>, ingestor: Ingestor, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ingestor: Arc::new(ingestor),
            picker: Arc::new(DailyPicker::new()),
            visitors: Arc::new(VisitorTracker::new()),
            clock,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::not_found(err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<PickError> for ApiError {
    fn from(err: PickError) -> Self {
        match err {
            PickError::Missing(_) => ApiError::not_found(err.to_string()),
            PickError::Store(inner) => {
                ApiError::internal(format!("Failed to fetch video: {inner}"))
            }
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::bad_gateway(err.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Runs a blocking store/upstream call on the blocking pool.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    let api = Router::new()
        .route("/fetch", get(fetch_playlist))
        .route("/videos", get(list_videos))
        .route("/video", get(daily_video))
        .route("/analytics", get(analytics));

    let mut app = Router::new()
        .route("/health", get(health))
        .nest(API_PREFIX, api);

    if static_dir.is_dir() {
        // Only the landing page counts visits; assets and API calls do not.
        let landing = Router::new()
            .route_service("/", ServeFile::new(static_dir.join("index.html")))
            .route_layer(middleware::from_fn_with_state(state.clone(), track_visitor));
        app = app
            .merge(landing)
            .fallback_service(ServeDir::new(static_dir));
    } else {
        warn!(dir = %static_dir.display(), "static directory not found, frontend disabled");
    }

    app.layer(cors_layer())
        .layer(timeout_layer(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn timeout_layer(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(false)
}

/// Always answers 200; an unreachable database shows up in the body.
async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthReport>> {
    let store = state.store.clone();
    let report = blocking(move || Ok(store.health())).await?;
    Ok(Json(report))
}

async fn fetch_playlist(State(state): State<AppState>) -> ApiResult<Json<Vec<PlaylistItem>>> {
    let store = state.store.clone();
    let ingestor = state.ingestor.clone();
    let outcome = blocking(move || Ok(ingestor.fetch_and_store(&store)?)).await?;
    info!(report = ?outcome.report, "fetch request finished");
    Ok(Json(outcome.items))
}

async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<VideoRecord>>> {
    let store = state.store.clone();
    let videos = blocking(move || Ok(store.get_all()?)).await?;
    Ok(Json(videos))
}

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    offset: Option<String>,
}

fn parse_offset(raw: Option<&str>) -> ApiResult<i64> {
    match raw {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid offset parameter")),
    }
}

/// A query string axum cannot decode (repeated keys, bad percent escapes) is
/// reported the same way as a non-numeric offset.
async fn daily_video(
    State(state): State<AppState>,
    query: Result<Query<VideoQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|rejection| {
        debug!(%rejection, "rejected video query string");
        ApiError::bad_request("Invalid offset parameter")
    })?;
    let offset = parse_offset(query.offset.as_deref())?;
    let now = state.clock.now();
    let store = state.store.clone();
    let picker = state.picker.clone();

    let pick = blocking(move || Ok(picker.resolve(&store, offset, now)?)).await?;
    let response = match pick {
        Pick::Video(video) => Json(video).into_response(),
        Pick::Exceeded => Json(json!({ "exceeded": EXCEEDED_MESSAGE })).into_response(),
    };
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct AnalyticsPayload {
    pub per_day: Vec<DailyVisits>,
    pub per_30_min: Vec<HalfHourVisits>,
}

async fn analytics(State(state): State<AppState>) -> ApiResult<Json<AnalyticsPayload>> {
    let store = state.store.clone();
    let payload = blocking(move || {
        Ok(AnalyticsPayload {
            per_day: store.aggregate_visits_by_day()?,
            per_30_min: store.aggregate_visits_by_half_hour()?,
        })
    })
    .await?;
    Ok(Json(payload))
}

fn visitor_cookie(id: String) -> Cookie<'static> {
    Cookie::build((VISITOR_COOKIE, id))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::days(COOKIE_MAX_AGE_DAYS))
        .build()
}

/// Counts the visit and hands new browsers their identifier cookie. A failed
/// count is logged and never fails the page itself.
async fn track_visitor(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let now = state.clock.now();
    let visitor = state
        .visitors
        .identify(jar.get(VISITOR_COOKIE).map(|cookie| cookie.value()), now);

    let store = state.store.clone();
    let visitors = state.visitors.clone();
    let visitor_id = visitor.id().to_owned();
    match task::spawn_blocking(move || visitors.track(&store, &visitor_id, now)).await {
        Ok(Ok(recorded)) => debug!(visitor = visitor.id(), recorded, "visitor tracked"),
        Ok(Err(err)) => warn!(visitor = visitor.id(), %err, "failed to record visit"),
        Err(err) => warn!(%err, "visit tracking task failed"),
    }

    let response = next.run(request).await;
    match visitor {
        Visitor::New(id) => (jar.add(visitor_cookie(id)), response).into_response(),
        Visitor::Returning(_) => response,
    }
}
