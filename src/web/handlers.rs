// API handlers for the web server

use super::{
    SharedState,
    error::ApiError,
    extract_request_data::extract_request_image,
    models::*,
};
use crate::queue::{Job, ProcessingStatus};
use crate::removal::OUTPUT_CONTENT_TYPE;
use axum::{
    Json,
    extract::{Path, Request, State},
    http::header,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use headers::Host;
use tracing::{debug, info};

pub const OUTPUT_ROUTE: &str = "/images-output";

// --- POST /remove-background ---
// Removes the background and returns the PNG inline
pub async fn remove_background(
    State(state): State<SharedState>,
    request: Request,
) -> Result<Json<ApiResponse<InlineImageData>>, ApiError> {
    let upload = extract_request_image(request).await?;
    info!(
        "Remove background request: {} bytes, file {:?}",
        upload.data.len(),
        upload.file_name
    );

    let output = state
        .runner
        .submit(Job::new(upload.data, upload.content_type))
        .await?;

    Ok(Json(ApiResponse::ok(
        "Background removed successfully.",
        InlineImageData {
            buffer: BASE64_STANDARD.encode(&output.image),
            content_type: OUTPUT_CONTENT_TYPE,
            processing_time: output.processing_time.as_millis() as u64,
        },
    )))
}

// --- POST /remove-background/link ---
// Removes the background, stores the result and returns a URL to it
pub async fn remove_background_link(
    State(state): State<SharedState>,
    host: Option<TypedHeader<Host>>,
    request: Request,
) -> Result<Json<ApiResponse<ImageLinkData>>, ApiError> {
    let upload = extract_request_image(request).await?;
    info!(
        "Remove background (link) request: {} bytes, file {:?}",
        upload.data.len(),
        upload.file_name
    );

    let output = state
        .runner
        .submit(Job::new(upload.data, upload.content_type))
        .await?;

    let file_name = state.store.save(&output.image).await?;
    let url = format!(
        "{}{}/{}",
        base_url(state.public_url.as_deref(), host.as_ref().map(|h| &h.0)),
        OUTPUT_ROUTE,
        file_name
    );
    debug!("Processed image available at {}", url);

    Ok(Json(ApiResponse::ok(
        "Image processed successfully. Use the provided URL to access the image without background.",
        ImageLinkData {
            url,
            processing_time: output.processing_time.as_millis() as u64,
        },
    )))
}

// Configured public URL wins; otherwise build one from the Host header.
// Without either the link is left relative.
fn base_url(public_url: Option<&str>, host: Option<&Host>) -> String {
    match (public_url, host) {
        (Some(url), _) => url.trim_end_matches('/').to_string(),
        (None, Some(host)) => match host.port() {
            Some(port) => format!("http://{}:{}", host.hostname(), port),
            None => format!("http://{}", host.hostname()),
        },
        (None, None) => String::new(),
    }
}

// --- GET /processing-status ---
pub async fn processing_status(State(state): State<SharedState>) -> Json<ProcessingStatus> {
    Json(state.status.current_status())
}

// --- GET /images-output/{file_name} ---
pub async fn get_processed_image(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let (data, content_type) = state
        .store
        .load(&file_name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Image {} not found", file_name)))?;

    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

// --- GET /health ---
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
