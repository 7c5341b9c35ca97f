//! Built-in tools available to the realtime model.

use callbridge_core::tools::{ToolError, ToolRegistry, ToolSchema};
use serde_json::{Value, json};
use tracing::debug;

/// Builds the default registry advertised to every call session.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSchema::function(
            "get_weather_from_coords",
            "Get the current weather at a location given its coordinates.",
            json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        ),
        get_weather_from_coords,
    );
    registry
}

/// Fetches the current temperature from the Open-Meteo API.
async fn get_weather_from_coords(args: Value) -> Result<Value, ToolError> {
    let latitude = args
        .get("latitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::Execution("latitude is required".to_string()))?;
    let longitude = args
        .get("longitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::Execution("longitude is required".to_string()))?;

    let url = format!(
        "https://api.open-meteo.com/v1/forecast?latitude={latitude}&longitude={longitude}&current_weather=true"
    );
    let body: Value = reqwest::get(&url)
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?
        .json()
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;

    let temperature = body
        .pointer("/current_weather/temperature")
        .cloned()
        .unwrap_or(Value::Null);
    debug!(latitude, longitude, "Weather lookup complete");
    Ok(json!({ "temperature": temperature }))
}
