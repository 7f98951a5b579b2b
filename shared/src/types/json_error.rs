use serde::{Deserialize, Serialize};

/// Standard error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// The rejection returned when a stream subscription carries neither an
    /// order id nor a tracking number. Sent as the pre-stream response body,
    /// never as a stream event.
    pub fn missing_tracking_key() -> Self {
        Self::new(
            "MISSING_TRACKING_KEY",
            "Missing required param: order_id or tracking_number",
        )
    }
}
