#![cfg(feature = "web")]

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::downloader;
use crate::error::SessionError;
use crate::field::{FieldValue, get_field_type_info, get_field_type_options};
use crate::field_config::{FieldConfigPatch, ResolvedField};
use crate::images::ImageMiss;
use crate::loader;
use crate::saving;
use crate::session::{FormSession, SessionStore};

pub struct AppState {
    sessions: Mutex<SessionStore>,
    config: AppConfig,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    status: String,
    template_id: String,
    fields: Vec<ResolvedField>,
    image_misses: Vec<ImageMiss>,
}

#[derive(Deserialize)]
struct ValueUpdate {
    instance_key: String,
    value: FieldValue,
}

#[derive(Serialize)]
struct ValuesResponse {
    status: String,
    values: HashMap<String, FieldValue>,
    errors: HashMap<String, String>,
}

#[derive(Deserialize)]
struct PublishRequest {
    name: String,
}

enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl AppError {
    fn message(&self) -> &str {
        match self {
            AppError::NotFound(m) | AppError::BadRequest(m) | AppError::Internal(m) => m,
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::UnknownField(_) => AppError::NotFound(e.to_string()),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Internal(m) => {
                error!("{}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (
            status,
            Json(StatusResponse {
                status: "error".to_string(),
                message: Some(message),
            }),
        )
            .into_response()
    }
}

fn lock_sessions(state: &AppState) -> Result<MutexGuard<'_, SessionStore>, AppError> {
    state
        .sessions
        .lock()
        .map_err(|_| AppError::Internal("session store lock poisoned".to_string()))
}

fn session_mut<'a>(
    sessions: &'a mut SessionStore,
    id: &str,
) -> Result<&'a mut FormSession, AppError> {
    sessions
        .get_mut(id)
        .ok_or_else(|| AppError::NotFound(format!("template '{}' not found", id)))
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let body_limit = config.max_upload_bytes;

    let app_state = Arc::new(AppState {
        sessions: Mutex::new(SessionStore::new(config.max_sessions)),
        config,
    });

    let app = Router::new()
        .route("/api/field-types", get(list_field_types))
        .route("/api/field-types/:name", get(field_type_info))
        .route("/api/templates", post(upload_template))
        .route("/api/templates/:id", delete(delete_template))
        .route("/api/templates/:id/upload", post(reupload_template))
        .route("/api/templates/:id/form", get(render_template))
        .route("/api/templates/:id/fields", get(list_fields))
        .route("/api/templates/:id/fields/:base_key", post(save_field_config))
        .route("/api/templates/:id/values", post(update_value))
        .route("/api/templates/:id/publish", post(publish_template))
        .route("/api/templates/:id/images/:image_id", get(serve_image))
        .route("/api/templates/:id/export.csv", get(export_csv))
        .route("/api/templates/:id/export.xlsx", get(export_xlsx))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn list_field_types() -> impl IntoResponse {
    Json(get_field_type_options())
}

async fn field_type_info(Path(name): Path<String>) -> impl IntoResponse {
    Json(get_field_type_info(&name))
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), AppError> {
    let mut file_name = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().unwrap_or("upload.html").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?
                .to_vec();
        }
    }

    if file_data.is_empty() {
        return Err(AppError::BadRequest("No file data received".to_string()));
    }
    Ok((file_name, file_data))
}

fn upload_response(session: &FormSession) -> UploadResponse {
    UploadResponse {
        status: "ok".to_string(),
        template_id: session.template_id().to_string(),
        fields: session.resolved_fields(),
        image_misses: session.image_misses().to_vec(),
    }
}

async fn upload_template(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let (file_name, file_data) = read_upload(multipart).await?;

    let mut session = FormSession::new();
    let ticket = session.begin_load();
    session.complete_upload(ticket, loader::load_template_bytes(&file_name, &file_data))?;

    let response = upload_response(&session);
    lock_sessions(&state)?.insert(session);
    Ok(Json(response))
}

async fn delete_template(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, AppError> {
    lock_sessions(&state)?
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("template '{}' not found", id)))?;
    info!("template {} deleted", id);
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        message: None,
    }))
}

async fn reupload_template(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let ticket = {
        let mut sessions = lock_sessions(&state)?;
        session_mut(&mut sessions, &id)?.begin_load()
    };

    let (file_name, file_data) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            // The previous content must not outlive a failed load.
            let mut sessions = lock_sessions(&state)?;
            if let Some(session) = sessions.get_mut(&id) {
                let _ = session.fail_load(ticket, e.message());
            }
            return Err(e);
        }
    };
    let source = loader::load_template_bytes(&file_name, &file_data);

    let mut sessions = lock_sessions(&state)?;
    let session = session_mut(&mut sessions, &id)?;
    session.complete_upload(ticket, source)?;
    Ok(Json(upload_response(session)))
}

async fn render_template(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let form = session_mut(&mut sessions, &id)?.render()?;
    Ok(Html(form.to_html()))
}

async fn list_fields(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ResolvedField>>, AppError> {
    let mut sessions = lock_sessions(&state)?;
    Ok(Json(session_mut(&mut sessions, &id)?.resolved_fields()))
}

fn values_response(session: &FormSession) -> ValuesResponse {
    let errors = session
        .descriptors()
        .iter()
        .filter_map(|d| {
            session
                .error(&d.instance_key)
                .map(|e| (d.instance_key.clone(), e.to_string()))
        })
        .collect();
    ValuesResponse {
        status: "ok".to_string(),
        values: session.values().clone(),
        errors,
    }
}

async fn update_value(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValueUpdate>,
) -> Result<Json<ValuesResponse>, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let session = session_mut(&mut sessions, &id)?;
    session.set_value(&payload.instance_key, payload.value)?;
    Ok(Json(values_response(session)))
}

async fn save_field_config(
    Path((id, base_key)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<FieldConfigPatch>,
) -> Result<Json<ValuesResponse>, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let session = session_mut(&mut sessions, &id)?;
    session.save_field_config(&base_key, &patch);
    Ok(Json(values_response(session)))
}

async fn publish_template(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<saving::PublishedTemplate>, AppError> {
    let payload = {
        let mut sessions = lock_sessions(&state)?;
        session_mut(&mut sessions, &id)?.publish(&request.name)?
    };

    saving::save_published_in(&payload, &state.config.data_dir)
        .map_err(|e| AppError::Internal(format!("failed to save published template: {}", e)))?;
    Ok(Json(payload))
}

async fn serve_image(
    Path((id, image_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let session = session_mut(&mut sessions, &id)?;
    let image = session
        .image_file(&image_id)
        .ok_or_else(|| AppError::NotFound(format!("image '{}' not found", image_id)))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, image.content_type())
        .body(Body::from(image.bytes.clone()))
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn export_csv(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let csv = downloader::to_csv(session_mut(&mut sessions, &id)?)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .body(Body::from(csv))
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn export_xlsx(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let mut sessions = lock_sessions(&state)?;
    let xlsx = downloader::to_xlsx(session_mut(&mut sessions, &id)?)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        )
        .body(Body::from(xlsx))
        .map_err(|e| AppError::Internal(e.to_string()))
}
