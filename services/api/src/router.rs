//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application:
//! the REST surface, the two WebSocket endpoints (`/call` for telephony
//! media streams, `/logs` for the observer), and OpenAPI documentation.

use crate::{
    handlers,
    models::{CallCreatedResponse, ErrorResponse, InitiateCallPayload, PublicUrlResponse},
    state::AppState,
    ws::{call_ws_handler, logs_ws_handler},
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::initiate_call,
        handlers::list_tools,
        handlers::public_url,
    ),
    components(
        schemas(InitiateCallPayload, CallCreatedResponse, PublicUrlResponse, ErrorResponse)
    ),
    tags(
        (name = "Callbridge API", description = "Outbound call initiation and tool discovery for the voice bridge")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/calls", post(handlers::initiate_call))
        .route("/twiml", get(handlers::twiml).post(handlers::twiml))
        .route("/tools", get(handlers::list_tools))
        .route("/public-url", get(handlers::public_url))
        .route("/call", get(call_ws_handler))
        .route("/logs", get(logs_ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
