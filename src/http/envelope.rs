use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

/// `{success, message, data?, error?}` response envelope (§6).
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    (status, Json(Envelope { success: true, message: message.into(), data: Some(data) })).into_response()
}

pub fn ok_empty(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(Envelope::<Value> { success: true, message: message.into(), data: None })).into_response()
}
