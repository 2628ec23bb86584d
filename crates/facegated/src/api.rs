//! HTTP surface: face registration, authentication and store management.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use facegate_core::{FaceStore, MatchOutcome, Profile, StoreError};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, EngineHandle};

/// Uploaded photos from phone cameras easily exceed axum's 2 MiB default.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: Arc<Mutex<FaceStore>>,
    pub match_threshold: f32,
    pub models_loaded: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/face/register", post(register))
        .route("/api/face/authenticate", post(authenticate))
        .route("/api/face/status/{user_id}", get(status))
        .route("/api/face/users", get(users))
        .route("/api/face/{user_id}", delete(remove))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("field required: {0}")]
    MissingField(&'static str),
    #[error("internal server error")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Extract(e) if e.is_client_error() => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyKey => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
}

/// GET /
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "facegate face recognition API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    models_loaded: bool,
    registered_faces: usize,
}

/// GET /api/health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registered_faces = state.store.lock().await.len();
    Json(HealthResponse {
        status: "healthy",
        models_loaded: state.models_loaded,
        registered_faces,
    })
}

/// Collected multipart form fields.
#[derive(Default)]
struct FaceForm {
    user_id: Option<String>,
    profile_data: Option<String>,
    file: Option<Vec<u8>>,
}

impl FaceForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FaceForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("user_id") => form.user_id = Some(field.text().await?),
                Some("profile_data") => form.profile_data = Some(field.text().await?),
                Some("file") => form.file = Some(field.bytes().await?.to_vec()),
                other => tracing::debug!(field = ?other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    message: &'static str,
    user_id: String,
}

/// POST /api/face/register
async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RegisterResponse>, ApiError> {
    let form = FaceForm::read(multipart).await?;
    let user_id = form.user_id.ok_or(ApiError::MissingField("user_id"))?;
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".into()));
    }
    let upload = form.file.ok_or(ApiError::MissingField("file"))?;

    let embedding = state.engine.encode(upload).await?;

    let profile = form
        .profile_data
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| match Profile::parse(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "invalid profile data, ignoring");
                None
            }
        });

    state.store.lock().await.register(&user_id, embedding, profile)?;
    tracing::info!(%user_id, "face registered");

    Ok(Json(RegisterResponse {
        success: true,
        message: "Face registered successfully",
        user_id,
    }))
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum AuthenticateResponse {
    Recognized {
        recognized: bool,
        user_id: String,
        confidence: f32,
        distance: f32,
        profile: Value,
    },
    Unrecognized {
        recognized: bool,
        message: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        closest_match: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance: Option<f32>,
    },
}

/// POST /api/face/authenticate
async fn authenticate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    let form = FaceForm::read(multipart).await?;
    let upload = form.file.ok_or(ApiError::MissingField("file"))?;
    let probe = state.engine.encode(upload).await?;

    let store = state.store.lock().await;
    let outcome = store.authenticate(&probe, state.match_threshold);

    let response = match outcome {
        MatchOutcome::Recognized { identity, distance, confidence } => {
            let profile = store.profile(&identity).map(Profile::as_json).unwrap_or_else(empty_object);
            AuthenticateResponse::Recognized {
                recognized: true,
                user_id: identity,
                confidence,
                distance,
                profile,
            }
        }
        MatchOutcome::Unrecognized { closest: None } if store.is_empty() => {
            AuthenticateResponse::Unrecognized {
                recognized: false,
                message: "No faces registered in database",
                closest_match: None,
                distance: None,
            }
        }
        MatchOutcome::Unrecognized { closest } => AuthenticateResponse::Unrecognized {
            recognized: false,
            message: "Face not recognized",
            distance: closest.as_ref().map(|c| c.distance),
            closest_match: closest.map(|c| c.identity),
        },
    };

    tracing::info!(result = ?response, "face authentication attempt");
    Ok(Json(response))
}

#[derive(Serialize)]
struct StatusResponse {
    user_id: String,
    face_registered: bool,
    profile: Option<Value>,
}

/// GET /api/face/status/{user_id}
async fn status(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<StatusResponse> {
    let store = state.store.lock().await;
    let face_registered = store.is_registered(&user_id);
    let profile = face_registered
        .then(|| store.profile(&user_id).map(Profile::as_json).unwrap_or_else(empty_object));

    Json(StatusResponse {
        user_id,
        face_registered,
        profile,
    })
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    message: &'static str,
}

/// DELETE /api/face/{user_id}
async fn remove(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.store.lock().await.remove(&user_id)?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "Face registration deleted successfully",
    }))
}

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<String>,
    count: usize,
}

/// GET /api/face/users
async fn users(State(state): State<AppState>) -> Json<UsersResponse> {
    let users = state.store.lock().await.identities();
    Json(UsersResponse {
        count: users.len(),
        users,
    })
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
