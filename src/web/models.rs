// API-specific data models for the web server

use serde::Serialize;

/// Envelope for successful responses
#[derive(Serialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: 200,
            message: message.into(),
            data,
        }
    }
}

/// Processed image returned inline, base64-encoded
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineImageData {
    pub buffer: String,
    pub content_type: &'static str,
    pub processing_time: u64,
}

/// Processed image stored on disk and reachable at `url`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageLinkData {
    pub url: String,
    pub processing_time: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: &'static str,
}
