//! Request body extraction.

use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` whose rejection is an enveloped validation error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
