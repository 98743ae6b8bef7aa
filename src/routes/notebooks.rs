use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    models::notebook::{CreateNotebook, NotebookPatch},
    responses::JsonResponse,
    routes::auth::session::AuthSession,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NotebookContextQuery {
    pub organization: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddSourcePayload {
    pub title: String,
}

pub async fn list_notebooks(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Query(params): Query<NotebookContextQuery>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.list_notebooks(user_id, params.organization).await {
        Ok(notebooks) => Json(json!({"success": true, "notebooks": notebooks})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn create_notebook(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CreateNotebook>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    if payload.title.trim().is_empty() {
        return JsonResponse::bad_request("Notebook title is required").into_response();
    }
    match app_state.store.create_notebook(user_id, payload).await {
        Ok(notebook) => Json(json!({"success": true, "notebook": notebook})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn get_notebook(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(notebook_id): Path<Uuid>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.get_notebook(user_id, notebook_id).await {
        Ok(notebook) => Json(json!({"success": true, "notebook": notebook})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn update_notebook(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(notebook_id): Path<Uuid>,
    Json(patch): Json<NotebookPatch>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.update_notebook(user_id, notebook_id, patch).await {
        Ok(notebook) => Json(json!({"success": true, "notebook": notebook})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn delete_notebook(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(notebook_id): Path<Uuid>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.delete_notebook(user_id, notebook_id).await {
        Ok(_) => Json(json!({"success": true})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn add_source(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(notebook_id): Path<Uuid>,
    Json(payload): Json<AddSourcePayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    if payload.title.trim().is_empty() {
        return JsonResponse::bad_request("Source title is required").into_response();
    }
    match app_state
        .store
        .add_source(user_id, notebook_id, payload.title.trim())
        .await
    {
        Ok(source) => Json(json!({"success": true, "source": source})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn remove_source(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path((_notebook_id, source_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.remove_source(user_id, source_id).await {
        Ok(_) => Json(json!({"success": true})).into_response(),
        Err(err) => err.into_response(),
    }
}
