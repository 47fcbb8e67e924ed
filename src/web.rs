use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::gateway::{AddItemRequest, CollectionItemView, GetItemRequest};

/// Body of `POST /api/collection/{collectionLocId}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateCollectionItemView {
    pub web_socket_url: Option<String>,
    pub directory_url: Option<String>,
    pub suri: Option<String>,
    pub item_id: Option<String>,
    pub item_description: Option<String>,
}

/// Body of `PUT /api/collection/{collectionLocId}/{itemId}`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetCollectionItemView {
    pub web_socket_url: Option<String>,
    pub directory_url: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|e| AppError::bad_request(format!("Invalid request body: {}", e.body_text())))
}

/// Build the gateway router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/collection/{collection_loc_id}", post(add_collection_item))
        .route(
            "/api/collection/{collection_loc_id}/{item_id}",
            put(get_collection_item),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Build the gateway router with a permissive CORS layer
pub fn build_router_with_cors(state: Arc<AppState>) -> Router {
    build_router(state).layer(CorsLayer::permissive())
}

async fn add_collection_item(
    State(st): State<Arc<AppState>>,
    Path(collection_loc_id): Path<String>,
    body: Result<Json<CreateCollectionItemView>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let body = json_body(body)?;
    info!(%collection_loc_id, "add collection item requested");
    st.gateway
        .add_collection_item(AddItemRequest {
            collection_loc_id,
            web_socket_url: body.web_socket_url.unwrap_or_default(),
            directory_url: body.directory_url,
            suri: body.suri.unwrap_or_default(),
            item_id: body.item_id.unwrap_or_default(),
            item_description: body.item_description.unwrap_or_default(),
        })
        .await?;
    Ok(StatusCode::OK)
}

async fn get_collection_item(
    State(st): State<Arc<AppState>>,
    Path((collection_loc_id, item_id)): Path<(String, String)>,
    body: Result<Json<GetCollectionItemView>, JsonRejection>,
) -> Result<Json<CollectionItemView>, AppError> {
    let body = json_body(body)?;
    info!(%collection_loc_id, %item_id, "get collection item requested");
    let view = st
        .gateway
        .get_collection_item(GetItemRequest {
            collection_loc_id,
            item_id,
            web_socket_url: body.web_socket_url.unwrap_or_default(),
            directory_url: body.directory_url,
        })
        .await?;
    Ok(Json(view))
}

async fn healthz(State(st): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "since": st.started_at.to_rfc3339(),
    }))
}
