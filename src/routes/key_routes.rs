use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    middleware,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::errors::{KeyError, KeyResult};
use crate::services::kv_service;
use crate::services::rate_limit::limit_key_creation;
use crate::state::app::AppState;

/// Build the /key routes.
///
/// Creation carries its own per-client limit on top of the global one.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/key",
            post(create_key)
                .layer(middleware::from_fn_with_state(
                    state.limits.clone(),
                    limit_key_creation,
                ))
                .get(get_key)
                .patch(update_key)
                .delete(delete_key),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKeyRequest {
    /// Optional, a random name is generated otherwise.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateKeyResponse {
    pub name: String,
    pub name_readonly: String,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValueResponse {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

//
// ─────────────────────────────────────────────────────────────
// POST /key
// Create a key pair; the body (and its name) are optional
// ─────────────────────────────────────────────────────────────
//
async fn create_key(
    State(state): State<AppState>,
    body: Bytes,
) -> KeyResult<Json<CreateKeyResponse>>
{
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        CreateKeyRequest::default()
    } else {
        serde_json::from_slice::<CreateKeyRequest>(&body)
            .map_err(|e| KeyError::InvalidRequest(format!("Invalid request body: {e}")))?
    };

    let pair = kv_service::create(&state.store, state.key_policy(), req.name).await?;

    Ok(Json(CreateKeyResponse {
        name: pair.name,
        name_readonly: pair.roname,
        success: true,
    }))
}

//
// ─────────────────────────────────────────────────────────────
// GET /key?name=...
// Read with either the read-write or the read-only key
// ─────────────────────────────────────────────────────────────
//
async fn get_key(
    State(state): State<AppState>,
    query: Result<Query<KeyQuery>, QueryRejection>,
) -> KeyResult<Json<ValueResponse>>
{
    let Query(q) = query.map_err(|e| KeyError::InvalidRequest(e.body_text()))?;

    let value = kv_service::read(&state.store, q.name).await?;
    Ok(Json(ValueResponse { value }))
}

//
// ─────────────────────────────────────────────────────────────
// PATCH /key
// Set the value; read-write key only
// ─────────────────────────────────────────────────────────────
//
async fn update_key(
    State(state): State<AppState>,
    payload: Result<Json<UpdateKeyRequest>, JsonRejection>,
) -> KeyResult<Json<SuccessResponse>>
{
    let Json(req) = payload.map_err(|e| KeyError::InvalidRequest(e.body_text()))?;

    kv_service::update(
        &state.store,
        state.config.max_value_length,
        req.name,
        req.value,
    )
    .await?;

    Ok(Json(SuccessResponse { success: true }))
}

//
// ─────────────────────────────────────────────────────────────
// DELETE /key?name=...
// Remove the key pair; read-write key only
// ─────────────────────────────────────────────────────────────
//
async fn delete_key(
    State(state): State<AppState>,
    query: Result<Query<KeyQuery>, QueryRejection>,
) -> KeyResult<Json<SuccessResponse>>
{
    let Query(q) = query.map_err(|e| KeyError::InvalidRequest(e.body_text()))?;

    kv_service::delete(&state.store, q.name).await?;
    Ok(Json(SuccessResponse { success: true }))
}
