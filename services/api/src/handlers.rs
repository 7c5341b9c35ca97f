//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests: outbound
//! call initiation, the TwiML callback the telephony provider fetches,
//! tool schema discovery, and the public-URL probe. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    config::Config,
    models::{CallCreatedResponse, ErrorResponse, InitiateCallPayload, PublicUrlResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message }))
                    .into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

const TWIML_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Say>Connected</Say>
  <Connect>
    <Stream url="{{WS_URL}}" />
  </Connect>
  <Say>Disconnected</Say>
</Response>"#;

/// Resolves the externally visible base URL for this service.
fn public_base(config: &Config, headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(url) = &config.public_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("Host header is required when PUBLIC_URL is unset".to_string())
        })?;
    Ok(format!("http://{host}"))
}

/// The media-stream WebSocket URL the telephony provider should connect to.
fn websocket_url(base: &str) -> String {
    let host = base
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    format!("wss://{}/call", host.trim_end_matches('/'))
}

/// Initiate an outbound call that will be bridged to the AI agent.
#[utoipa::path(
    post,
    path = "/calls",
    request_body = InitiateCallPayload,
    responses(
        (status = 201, description = "Call created successfully", body = CallCreatedResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 503, description = "Outbound dialing is not configured", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn initiate_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<InitiateCallPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.phone_number.trim().is_empty() {
        return Err(ApiError::BadRequest("phoneNumber is required".to_string()));
    }
    let dialer = state.dialer.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Outbound dialing is not configured".to_string())
    })?;

    let twiml_url = format!("{}/twiml", public_base(&state.config, &headers)?);
    let call_sid = dialer.create_call(&payload.phone_number, &twiml_url).await?;
    info!(%call_sid, "Outbound call initiated");

    Ok((StatusCode::CREATED, Json(CallCreatedResponse { call_sid })))
}

/// TwiML instructions fetched by the telephony provider when a call is
/// answered: greet, then connect the media stream to our `/call` socket.
pub async fn twiml(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let base = public_base(&state.config, &headers)?;
    let ws_url = websocket_url(&base);
    info!(%ws_url, "Serving TwiML");

    let body = TWIML_TEMPLATE.replace("{{WS_URL}}", &ws_url);
    Ok(([(header::CONTENT_TYPE, "text/xml")], body).into_response())
}

/// List the registered tool schemas.
#[utoipa::path(
    get,
    path = "/tools",
    responses(
        (status = 200, description = "Registered tool schemas")
    )
)]
pub async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.tools.schemas())
}

/// Report the externally visible base URL of this service.
#[utoipa::path(
    get,
    path = "/public-url",
    responses(
        (status = 200, description = "Public base URL", body = PublicUrlResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn public_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PublicUrlResponse>, ApiError> {
    let public_url = public_base(&state.config, &headers)?;
    Ok(Json(PublicUrlResponse { public_url }))
}
