use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::http::{FileNamePath, UploadResponse},
    error::AppError,
    routes::api::bearer_token,
    services::{authorization::TokenKind, files},
    state::SharedState,
};

const FILE_NAME_HEADER: &str = "x-file-name";

fn require_token(state: &SharedState, headers: &HeaderMap) -> Result<(), AppError> {
    let identity = state
        .tokens()
        .identify(bearer_token(headers), &[TokenKind::Rest, TokenKind::Websocket]);
    if identity.client_type.is_none() {
        return Err(AppError::Unauthorized("a valid bearer token is required".into()));
    }
    Ok(())
}

/// Store an image and return the key it can be fetched with.
#[utoipa::path(
    post,
    path = "/api/file/upload",
    tag = "files",
    params(
        ("Authorization" = String, Header, description = "Bearer token"),
        ("X-File-Name" = String, Header, description = "Original file name, used for the extension check")
    ),
    request_body(content = Vec<u8>, content_type = "image/png", description = "Raw image bytes"),
    responses(
        (status = 200, description = "Stored", body = UploadResponse),
        (status = 400, description = "Not an acceptable image"),
        (status = 413, description = "Image too large")
    )
)]
pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    require_token(&state, &headers)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let file_id = files::store_upload(&state.config().files_dir, content_type, file_name, &body).await?;
    Ok(Json(UploadResponse { file_id }))
}

/// Serve a stored image.
#[utoipa::path(
    get,
    path = "/api/file/{name}",
    tag = "files",
    params(
        FileNamePath,
        ("Authorization" = String, Header, description = "Bearer token")
    ),
    responses(
        (status = 200, description = "Image bytes", content_type = "application/octet-stream"),
        (status = 404, description = "No such file")
    )
)]
pub async fn download(
    State(state): State<SharedState>,
    Valid(Path(FileNamePath { name })): Valid<Path<FileNamePath>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    require_token(&state, &headers)?;
    let bytes = files::load_file(&state.config().files_dir, &name).await?;
    let content_type = files::sniff_content_type(&bytes);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// Configure the file routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/file/upload", post(upload))
        .route("/api/file/{name}", get(download))
        .layer(DefaultBodyLimit::max(files::MAX_UPLOAD_BYTES * 2))
}
