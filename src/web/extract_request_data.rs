use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError, rejection::BytesRejection},
    http::{StatusCode, header},
};
use image::ImageFormat;
use tracing::{debug, warn};

use super::error::ApiError;

// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

// Formats the removal pipeline accepts
const SUPPORTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

#[derive(Debug)]
pub struct UploadedImage {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// Pulls the image out of the request and checks that it is something the
/// remover can work with. Runs before the admission gate is consulted.
pub async fn extract_request_image(request: Request) -> Result<UploadedImage, ApiError> {
    // Get the content type from the request headers
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let upload = if content_type.starts_with("multipart/form-data") {
        extract_multipart_image(request).await?
    } else {
        extract_direct_image(request, &content_type).await?
    };

    validate_image(&upload)?;
    Ok(upload)
}

// Only an exceeded body limit is 413; any other read failure is the client's fault.
fn body_error(e: BytesRejection) -> ApiError {
    let message = format!("Failed to read request body: {}", e.body_text());
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

fn multipart_error(context: &str, e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("{}: {}", context, e))
    } else {
        ApiError::BadRequest(format!("{}: {}", context, e))
    }
}

async fn extract_multipart_image(request: Request) -> Result<UploadedImage, ApiError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to process multipart request: {}", e)))?;

    let mut upload: Option<UploadedImage> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to process multipart field", e))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            debug!("Ignoring multipart field: {}", field.name().unwrap_or("unnamed"));
            continue;
        }

        if upload.is_some() {
            warn!("Multiple 'image' fields found in multipart request, using the last one");
        }

        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        debug!(
            "Received image {:?} with content type {:?}",
            file_name, content_type
        );

        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read image data", e))?
            .to_vec();

        if data.is_empty() {
            return Err(ApiError::BadRequest(
                "Uploaded 'image' field is empty.".to_string(),
            ));
        }

        upload = Some(UploadedImage {
            data,
            content_type,
            file_name,
        });
    }

    upload.ok_or_else(|| {
        ApiError::BadRequest(
            "An image is required and must be sent as a file (field 'image').".to_string(),
        )
    })
}

async fn extract_direct_image(
    request: Request,
    content_type: &str,
) -> Result<UploadedImage, ApiError> {
    if content_type.is_empty() {
        return Err(ApiError::BadRequest(
            "An image is required and must be sent as a file (field 'image').".to_string(),
        ));
    }
    if !content_type.starts_with("image/") && !content_type.starts_with("application/octet-stream")
    {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Content-Type '{}' is not supported. Expected multipart/form-data, image/* or application/octet-stream.",
            content_type
        )));
    }

    // The body limit comes from the router's DefaultBodyLimit layer.
    let bytes = Bytes::from_request(request, &()).await.map_err(body_error)?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Request body is empty.".to_string()));
    }

    Ok(UploadedImage {
        data: bytes.to_vec(),
        content_type: Some(content_type.to_string()),
        file_name: None,
    })
}

// Declared type (if any) must be a supported image type, and the bytes
// themselves must sniff as one.
fn validate_image(upload: &UploadedImage) -> Result<(), ApiError> {
    let declared = upload
        .content_type
        .as_deref()
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .filter(|m| *m != mime::APPLICATION_OCTET_STREAM);

    if let Some(mime) = declared {
        let supported = ImageFormat::from_mime_type(mime.essence_str())
            .is_some_and(|format| SUPPORTED_FORMATS.contains(&format));
        if !supported {
            return Err(ApiError::UnsupportedMediaType(format!(
                "File type '{}' is not allowed. Only PNG, JPEG and WebP images are accepted.",
                mime.essence_str()
            )));
        }
    }

    match image::guess_format(&upload.data) {
        Ok(format) if SUPPORTED_FORMATS.contains(&format) => Ok(()),
        _ => Err(ApiError::BadRequest(
            "Uploaded file is not a valid PNG, JPEG or WebP image.".to_string(),
        )),
    }
}
