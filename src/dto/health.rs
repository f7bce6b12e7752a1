use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::format_timestamp_ms;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Server clock in RFC 3339.
    pub server_time: String,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(now_ms: i64) -> Self {
        Self {
            status: "ok".to_string(),
            server_time: format_timestamp_ms(now_ms),
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(now_ms: i64) -> Self {
        Self {
            status: "degraded".to_string(),
            server_time: format_timestamp_ms(now_ms),
        }
    }
}
