//! Route handlers

use super::{
    dto::{
        BatchStatsBody, CleanupResponse, DimensionField, DownloadZipRequest, HealthResponse,
        ItemResultBody, OptionsFields, ProcessImagesRequest, ProcessResponse,
        ProcessSessionRequest, SessionProcessResponse, UploadResponse, UploadedFile,
    },
    error::{ApiError, ApiJson},
    AppState,
};
use crate::{
    archive::{png_name, sanitize_filename, ArchivePacker, EntryNamer},
    error::ProcessingError,
    pipeline::{ImageItem, ItemResult},
    services::{FormatGate, ImageCodec},
    session::SessionStore,
};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio::task;
use tracing::{info, instrument, warn};

type ApiResult<T> = Result<T, ApiError>;

/// Run CPU-bound archive work off the async workers
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| ProcessingError::internal(format!("Worker failed: {e}")))?
        .map_err(ApiError::from)
}

fn attachment(bytes: Vec<u8>, content_type: &'static str, filename: &str) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response()
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Image processing server is running".to_string(),
        supported_formats: FormatGate::format_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        background_removal: state.processor.pipeline().has_background_removal(),
    })
}

#[instrument(skip_all, fields(images = request.images.len()))]
pub async fn process_images(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ProcessImagesRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    if request.images.is_empty() {
        return Err(ApiError::bad_request("No images provided"));
    }
    let options = request.options.to_options()?;

    let items = request
        .images
        .into_iter()
        .enumerate()
        .map(|(index, image)| {
            let filename = image
                .filename
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("image_{index}.png"));
            let data = image.data.ok_or_else(|| {
                ApiError::bad_request(format!("Image '{filename}' has no data"))
            })?;
            Ok(ImageItem::from_base64(filename, data))
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let batch = state.processor.process_batch(items, options).await?;
    Ok(Json(ProcessResponse::inline(&batch)))
}

#[instrument(skip_all, fields(entries = request.images.len()))]
pub async fn download_zip(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DownloadZipRequest>,
) -> ApiResult<Response> {
    let mut entries = Vec::new();
    for (index, entry) in request.images.into_iter().enumerate() {
        if !entry.success {
            continue;
        }
        let Some(payload) = entry.processed_image else {
            continue;
        };
        let filename = entry
            .filename
            .unwrap_or_else(|| format!("image_{index}.png"));
        match ImageCodec::decode_base64(&payload) {
            Ok(bytes) => entries.push((png_name(&filename), bytes)),
            Err(e) => warn!(%filename, error = %e, "skipping undecodable entry"),
        }
    }

    if entries.is_empty() {
        return Err(ApiError::bad_request("No successful images to download"));
    }

    let naming = state.processor.pipeline().config().archive_naming;
    let count = entries.len();
    let zip = blocking(move || ArchivePacker::pack(entries, naming)).await?;
    info!(entries = count, bytes = zip.len(), "archive built");

    let filename = format!(
        "processed_images_{}.zip",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok(attachment(zip, "application/zip", &filename))
}

#[instrument(skip_all)]
pub async fn process_zip(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let mut archive: Option<(String, Vec<u8>)> = None;
    let mut fields = OptionsFields::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                archive = Some((filename, bytes.to_vec()));
            },
            "removeBackground" => fields.remove_background = parse_flag(&field.text().await?),
            "resize" => fields.resize = parse_flag(&field.text().await?),
            "width" => fields.width = Some(DimensionField::Text(field.text().await?)),
            "height" => fields.height = Some(DimensionField::Text(field.text().await?)),
            _ => {},
        }
    }

    let (filename, bytes) = archive.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    if filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !filename.to_lowercase().ends_with(".zip") {
        return Err(ApiError::bad_request("File must be a ZIP archive"));
    }
    let options = fields.to_options()?;

    let limit = state.max_extracted_bytes;
    let items = blocking(move || ArchivePacker::extract_images(&bytes, limit)).await?;
    if items.is_empty() {
        return Err(ApiError::bad_request("No supported images found in ZIP file"));
    }
    let total_extracted = items.len();
    info!(%filename, total_extracted, "archive extracted");

    let batch = state.processor.process_batch(items, options).await?;
    let mut response = ProcessResponse::inline(&batch);
    response.stats.total_extracted = Some(total_extracted);
    Ok(Json(response))
}

#[instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let filename = sanitize_filename(&raw_name, "");
        let bytes = field.bytes().await?;

        if filename.is_empty() || !FormatGate::is_supported(&filename) {
            rejected.push(raw_name);
            continue;
        }
        match ImageCodec::probe_dimensions(&bytes) {
            Ok((width, height)) => accepted.push((filename, bytes, width, height)),
            Err(e) => {
                warn!(%filename, error = %e, "rejecting unreadable upload");
                rejected.push(raw_name);
            },
        }
    }

    if accepted.is_empty() {
        return Err(ApiError::bad_request("No valid image files uploaded"));
    }

    let session_id = state.sessions.create().await?;
    let mut files = Vec::with_capacity(accepted.len());
    for (filename, bytes, width, height) in accepted {
        let stored = state
            .sessions
            .add_upload(session_id, &filename, &bytes)
            .await?;
        files.push(UploadedFile {
            filename: stored,
            size: bytes.len(),
            width,
            height,
        });
    }

    info!(session_id = %session_id, files = files.len(), rejected = rejected.len(), "upload stored");
    Ok(Json(UploadResponse {
        session_id: session_id.to_string(),
        files,
        rejected,
    }))
}

#[instrument(skip_all, fields(session_id = %request.session_id))]
pub async fn process_session(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ProcessSessionRequest>,
) -> ApiResult<Json<SessionProcessResponse>> {
    let session_id = SessionStore::parse_id(&request.session_id)?;
    let options = request.settings.to_options()?;

    let uploads = state.sessions.uploads(session_id).await?;
    if uploads.is_empty() {
        return Err(ApiError::bad_request("Session has no uploaded files"));
    }

    let mut items = Vec::with_capacity(uploads.len());
    for file in &uploads {
        let bytes = state.sessions.read_upload(session_id, &file.filename).await?;
        items.push(ImageItem::from_bytes(file.filename.clone(), bytes));
    }

    let batch = state.processor.process_batch(items, options).await?;

    let mut namer = EntryNamer::new(state.processor.pipeline().config().archive_naming);
    let mut results = Vec::with_capacity(batch.results.len());
    for result in &batch.results {
        let output_file = match result {
            ItemResult::Success(success) => {
                let name = namer.assign(&png_name(&success.filename));
                Some(
                    state
                        .sessions
                        .store_output(session_id, &name, &success.png)
                        .await?,
                )
            },
            ItemResult::Failure(_) => None,
        };
        results.push(ItemResultBody::stored(result, output_file));
    }
    state.sessions.mark_processed(session_id).await?;

    Ok(Json(SessionProcessResponse {
        session_id: session_id.to_string(),
        results,
        stats: BatchStatsBody::from(&batch.summary),
    }))
}

#[instrument(skip(state))]
pub async fn download_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    let id = SessionStore::parse_id(&session_id)?;
    let outputs = state.sessions.outputs(id).await?;

    match outputs.as_slice() {
        [] => Err(ApiError::not_found("No processed files found")),
        [single] => {
            let bytes = state.sessions.read_output(id, &single.filename).await?;
            Ok(attachment(bytes, "image/png", &single.filename))
        },
        many => {
            let mut entries = Vec::with_capacity(many.len());
            for file in many {
                let bytes = state.sessions.read_output(id, &file.filename).await?;
                entries.push((file.filename.clone(), bytes));
            }
            let naming = state.processor.pipeline().config().archive_naming;
            let zip = blocking(move || ArchivePacker::pack(entries, naming)).await?;
            Ok(attachment(zip, "application/zip", &format!("session_{id}.zip")))
        },
    }
}

#[instrument(skip(state))]
pub async fn preview(
    State(state): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = SessionStore::parse_id(&session_id)?;
    let bytes = state.sessions.read_output(id, &filename).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

#[instrument(skip(state))]
pub async fn cleanup(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CleanupResponse>> {
    let id = SessionStore::parse_id(&session_id)?;
    state.sessions.remove(id).await?;
    Ok(Json(CleanupResponse {
        success: true,
        session_id: id.to_string(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
