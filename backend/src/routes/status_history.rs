use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::users::UserResponse;
use crate::auth::{
    roles::{ADMIN_ONLY, STAFF},
    AuthenticatedUser,
};
use crate::error::{AppError, AppResult};
use crate::lifecycle::RequestStatus;
use crate::models::{NewStatusHistoryEntry, StatusHistoryEntry, User};
use crate::schema::{status_history, users};
use crate::state::AppState;
use crate::utils::json::{nullable_string, nullable_uuid, present_string, reference_id};
use crate::utils::time::to_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "requete_id")]
    pub request_id: Uuid,
    #[serde(rename = "ancien_statut")]
    pub old_status: String,
    #[serde(rename = "nouveau_statut")]
    pub new_status: String,
    #[serde(rename = "commentaire", default)]
    pub comment: Option<String>,
    #[serde(rename = "agent_id", default)]
    pub agent: Option<UserResponse>,
    #[serde(rename = "date_changement")]
    pub changed_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusHistoryQuery {
    pub requete_id: Option<Uuid>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = status_history)]
struct UpdateStatusHistoryChangeset {
    old_status: Option<String>,
    new_status: Option<String>,
    comment: Option<Option<String>>,
    agent_id: Option<Option<Uuid>>,
}

fn status_label(body: &Value, key: &str) -> AppResult<Option<String>> {
    present_string(body, key)
        .map_err(AppError::bad_request)?
        .map(|value| {
            value
                .parse::<RequestStatus>()
                .map(|status| status.as_str().to_string())
                .map_err(AppError::bad_request)
        })
        .transpose()
}

fn resolve_entries(
    conn: &mut PgConnection,
    rows: Vec<StatusHistoryEntry>,
) -> AppResult<Vec<StatusHistoryResponse>> {
    let agent_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.agent_id).collect();
    let agents: HashMap<Uuid, User> = if agent_ids.is_empty() {
        HashMap::new()
    } else {
        users::table
            .filter(users::id.eq_any(agent_ids))
            .load::<User>(conn)?
            .into_iter()
            .map(|user| (user.id, user))
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|row| StatusHistoryResponse {
            id: row.id,
            request_id: row.request_id,
            old_status: row.old_status,
            new_status: row.new_status,
            comment: row.comment,
            agent: row
                .agent_id
                .and_then(|id| agents.get(&id).cloned())
                .map(UserResponse::from),
            changed_at: to_iso(row.changed_at),
        })
        .collect())
}

fn resolve_one(
    conn: &mut PgConnection,
    row: StatusHistoryEntry,
) -> AppResult<StatusHistoryResponse> {
    resolve_entries(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

pub async fn list_status_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<StatusHistoryQuery>,
) -> AppResult<Json<Vec<StatusHistoryResponse>>> {
    user.require_any(STAFF)?;
    let mut conn = state.db()?;

    let mut sql = status_history::table.into_boxed();
    if let Some(request_id) = query.requete_id {
        sql = sql.filter(status_history::request_id.eq(request_id));
    }
    let rows: Vec<StatusHistoryEntry> = sql
        .order(status_history::changed_at.asc())
        .load(&mut conn)?;
    Ok(Json(resolve_entries(&mut conn, rows)?))
}

pub async fn get_status_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<StatusHistoryResponse>> {
    user.require_any(STAFF)?;
    let mut conn = state.db()?;
    let row: StatusHistoryEntry = status_history::table.find(entry_id).first(&mut conn)?;
    Ok(Json(resolve_one(&mut conn, row)?))
}

/// Manual history record; does not touch the request's current status.
pub async fn create_status_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<StatusHistoryResponse>)> {
    user.require_any(STAFF)?;

    let request_id = match body.get("requete_id") {
        None | Some(Value::Null) => return Err(AppError::missing_field("requete_id")),
        Some(value) => reference_id(value)
            .ok_or_else(|| AppError::bad_request("requete_id must be a valid id"))?,
    };
    let old_status =
        status_label(&body, "ancien_statut")?.ok_or_else(|| AppError::missing_field("ancien_statut"))?;
    let new_status = status_label(&body, "nouveau_statut")?
        .ok_or_else(|| AppError::missing_field("nouveau_statut"))?;
    let agent_id = match nullable_uuid(&body, "agent_id").map_err(AppError::bad_request)? {
        Some(agent) => agent,
        None => Some(user.user_id),
    };

    let entry = NewStatusHistoryEntry {
        id: Uuid::new_v4(),
        request_id,
        old_status,
        new_status,
        comment: nullable_string(&body, "commentaire")
            .map_err(AppError::bad_request)?
            .flatten(),
        agent_id,
    };

    let mut conn = state.db()?;
    let created: StatusHistoryEntry = diesel::insert_into(status_history::table)
        .values(&entry)
        .get_result(&mut conn)?;

    info!(entry_id = %created.id, request_id = %created.request_id, "status history recorded");
    Ok((StatusCode::CREATED, Json(resolve_one(&mut conn, created)?)))
}

pub async fn update_status_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<StatusHistoryResponse>> {
    user.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;
    let existing: StatusHistoryEntry = status_history::table.find(entry_id).first(&mut conn)?;

    let changeset = UpdateStatusHistoryChangeset {
        old_status: status_label(&body, "ancien_statut")?,
        new_status: status_label(&body, "nouveau_statut")?,
        comment: nullable_string(&body, "commentaire").map_err(AppError::bad_request)?,
        agent_id: nullable_uuid(&body, "agent_id").map_err(AppError::bad_request)?,
    };
    if changeset.old_status.is_none()
        && changeset.new_status.is_none()
        && changeset.comment.is_none()
        && changeset.agent_id.is_none()
    {
        return Ok(Json(resolve_one(&mut conn, existing)?));
    }

    let updated: StatusHistoryEntry = diesel::update(status_history::table.find(entry_id))
        .set(&changeset)
        .get_result(&mut conn)?;
    info!(entry_id = %updated.id, "status history updated");
    Ok(Json(resolve_one(&mut conn, updated)?))
}

pub async fn delete_status_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    user.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;
    let deleted = diesel::delete(status_history::table.find(entry_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(entry_id = %entry_id, "status history deleted");
    Ok(Json(json!({ "message": "status history deleted" })))
}
