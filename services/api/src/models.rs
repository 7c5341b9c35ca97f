//! API Models
//!
//! Request/response bodies for the REST surface, annotated for OpenAPI
//! generation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallPayload {
    /// Destination number in E.164 format.
    #[schema(example = "+15551234567")]
    pub phone_number: String,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CallCreatedResponse {
    pub call_sid: String,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicUrlResponse {
    pub public_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
