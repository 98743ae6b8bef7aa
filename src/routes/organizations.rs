use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    models::organization::OrganizationRole,
    responses::JsonResponse,
    routes::auth::session::AuthSession,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct OrganizationNamePayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberPayload {
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: OrganizationRole,
}

fn default_member_role() -> OrganizationRole {
    OrganizationRole::Member
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRolePayload {
    pub role: OrganizationRole,
}

pub async fn list_organizations(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.list_organizations(user_id).await {
        Ok(organizations) => {
            Json(json!({"success": true, "organizations": organizations})).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn create_organization(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<OrganizationNamePayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    let name = payload.name.trim();
    if name.is_empty() {
        return JsonResponse::bad_request("Organization name is required").into_response();
    }
    match app_state.store.create_organization(user_id, name).await {
        Ok((organization, membership)) => Json(
            json!({"success": true, "organization": organization, "membership": membership}),
        )
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn update_organization(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<OrganizationNamePayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    let name = payload.name.trim();
    if name.is_empty() {
        return JsonResponse::bad_request("Organization name is required").into_response();
    }
    match app_state
        .store
        .update_organization(user_id, organization_id, name)
        .await
    {
        Ok(organization) => {
            Json(json!({"success": true, "organization": organization})).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn delete_organization(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(organization_id): Path<Uuid>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state
        .store
        .delete_organization(user_id, organization_id)
        .await
    {
        Ok(_) => Json(json!({"success": true})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_members(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(organization_id): Path<Uuid>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.list_members(user_id, organization_id).await {
        Ok(members) => Json(json!({"success": true, "members": members})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn add_member(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<AddMemberPayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    let email = payload.email.trim();
    if email.is_empty() {
        return JsonResponse::bad_request("Member email is required").into_response();
    }
    match app_state
        .store
        .add_member(user_id, organization_id, email, payload.role)
        .await
    {
        Ok(member) => Json(json!({"success": true, "member": member})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn update_member_role(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path((_organization_id, member_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateMemberRolePayload>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state
        .store
        .update_member_role(user_id, member_id, payload.role)
        .await
    {
        Ok(member) => Json(json!({"success": true, "member": member})).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn remove_member(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path((_organization_id, member_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    match app_state.store.remove_member(user_id, member_id).await {
        Ok(_) => Json(json!({"success": true})).into_response(),
        Err(err) => err.into_response(),
    }
}
