// handlers/mod.rs - HTTP handlers, one module per API area
//
// Every handler lives behind the JWT middleware under /api/*. Handlers stay
// thin: extract, call a service, wrap the result in ApiResponse.

pub mod permission_engine; // /api/permission-engine/*
pub mod recommendations; // /api/ai-recommendations/*
pub mod system; // /api/system/*
pub mod tenants; // /api/tenants/*
pub mod users; // /api/user-management/*

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Body that may be omitted entirely; an empty body means `T::default()`
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("Invalid JSON body: {}", e)))
}
