use axum::Json;
use axum::extract::State;
use paygate_core::{Group, PaygateError};
use paygate_store::KeyPatch;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

use super::audit_log;

pub async fn create_group(State(state): State<AppState>, Json(group): Json<Group>) -> Result<Json<Group>, ApiError> {
    let created = state.key_store.create_group(group).map_err(PaygateError::from)?;
    audit_log(&state, "group.created", "admin", &format!("created group \"{}\"", created.name)).await;
    Ok(Json(created))
}

pub async fn update_group(State(state): State<AppState>, Json(group): Json<Group>) -> Result<Json<Group>, ApiError> {
    let updated = state.key_store.create_group(group).map_err(PaygateError::from)?;
    audit_log(&state, "group.updated", "admin", &format!("updated group \"{}\"", updated.name)).await;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct GroupNameRequest {
    pub name: String,
}

pub async fn delete_group(State(state): State<AppState>, Json(req): Json<GroupNameRequest>) -> Result<(), ApiError> {
    state.key_store.delete_group(&req.name).map_err(PaygateError::from)?;
    audit_log(&state, "group.deleted", "admin", &format!("deleted group \"{}\"", req.name)).await;
    Ok(())
}

pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<Group>> {
    Json(state.key_store.list_groups())
}

#[derive(Debug, Deserialize)]
pub struct GroupAssignRequest {
    pub key: String,
    pub group: String,
}

pub async fn assign_group(State(state): State<AppState>, Json(req): Json<GroupAssignRequest>) -> Result<(), ApiError> {
    let patch = KeyPatch {
        group: Some(Some(req.group)),
        ..Default::default()
    };
    state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct GroupRemoveRequest {
    pub key: String,
}

pub async fn remove_group(State(state): State<AppState>, Json(req): Json<GroupRemoveRequest>) -> Result<(), ApiError> {
    let patch = KeyPatch {
        group: Some(None),
        ..Default::default()
    };
    state.key_store.update_meta(&req.key, patch).map_err(PaygateError::from)?;
    Ok(())
}
