//! HTTP handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use uuid::Uuid;

use super::models::{ErrorResponse, HealthResponse, QueryRequest, QueryResponse};
use super::AppState;
use crate::backend::{BackendError, StreamMessage, Streams};
use crate::contract::{Contract, ContractDraft};
use crate::schema::QueryOptions;

/// Backend errors rendered as HTTP responses.
pub struct ApiError(BackendError);

impl From<BackendError> for ApiError {
    fn from(error: BackendError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackendError::SlugInvalid(_)
            | BackendError::VersionInvalid(_)
            | BackendError::InvalidLink(_)
            | BackendError::NoLinkTarget(_)
            | BackendError::UnknownRelationship { .. }
            | BackendError::Compile(_) => StatusCode::BAD_REQUEST,
            BackendError::ElementAlreadyExists { .. } | BackendError::IdAlreadyExists { .. } => {
                StatusCode::CONFLICT
            }
            BackendError::NoElement(_) => StatusCode::NOT_FOUND,
            BackendError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            BackendError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(state.backend.pool())
        .await
        .map_err(BackendError::from)?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let options = QueryOptions::from_value(&request.options).map_err(BackendError::from)?;
    let results = state
        .backend
        .query(&request.schema, &request.select, &options)
        .await?;
    Ok(Json(QueryResponse { results }))
}

pub async fn insert_contract_handler(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ContractDraft>,
) -> Result<(StatusCode, Json<Contract>), ApiError> {
    let contract = state.backend.insert_contract(draft).await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn get_contract_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, ApiError> {
    match state.backend.get_contract_by_id(id).await? {
        Some(contract) => Ok(Json(contract)),
        None => Err(BackendError::NoElement(id.to_string()).into()),
    }
}

pub async fn replace_contract_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<ContractDraft>,
) -> Result<Json<Contract>, ApiError> {
    let contract = state.backend.replace_contract(id, draft).await?;
    Ok(Json(contract))
}

pub async fn delete_contract_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.backend.delete_contract(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(BackendError::NoElement(id.to_string()).into())
    }
}

pub async fn get_by_slug_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Contract>, ApiError> {
    match state.backend.get_contract_by_slug(&reference).await? {
        Some(contract) => Ok(Json(contract)),
        None => Err(BackendError::NoElement(reference).into()),
    }
}

/// Detach the subscriber when its SSE stream is dropped.
struct DetachGuard {
    streams: Arc<Streams>,
    id: Uuid,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let streams = self.streams.clone();
        let id = self.id;
        tokio::spawn(async move {
            streams.detach(id).await;
        });
    }
}

/// Attach a change stream and relay matcher events as server-sent events.
/// Matcher errors arrive as `error` events; they do not end the stream.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let options = QueryOptions::from_value(&request.options).map_err(BackendError::from)?;
    let (id, receiver) = state
        .streams
        .attach(request.schema, request.select, options)
        .await?;
    let guard = DetachGuard {
        streams: state.streams.clone(),
        id,
    };

    let stream = futures_util::stream::unfold(
        (receiver, guard),
        |(mut receiver, guard)| async move {
            let message = receiver.recv().await?;
            let event = match message {
                StreamMessage::Event(event) => Event::default()
                    .event("change")
                    .data(serde_json::to_string(&event).unwrap_or_default()),
                StreamMessage::Error(error) => Event::default().event("error").data(error),
            };
            Some((Ok::<_, Infallible>(event), (receiver, guard)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
