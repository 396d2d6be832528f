//! JSON response envelope.
//!
//! Every response body, success or failure, has the shape
//! `{"success": bool, "message"?: string, "data"?: any}`.

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Uniform response body.
#[derive(Debug, Serialize)]
pub struct Envelope<T = ()> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// A successful response carrying data.
    pub const fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Attach a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope {
    /// A successful response with only a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// A failed response with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted() {
        let body = serde_json::to_value(Envelope::ok("Added To Cart")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"success": true, "message": "Added To Cart"})
        );

        let body = serde_json::to_value(Envelope::data(vec![1, 2])).unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "data": [1, 2]}));
    }

    #[test]
    fn test_failure_shape() {
        let body = serde_json::to_value(Envelope::failure("Payment Failed")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"success": false, "message": "Payment Failed"})
        );
    }
}
