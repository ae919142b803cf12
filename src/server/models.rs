//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /query` and `POST /streams`: the same
/// `(select, schema, options)` triple the compiler takes.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub select: Value,
    pub schema: Value,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
