use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::documents::{attach_document, load_documents_for_requests, DocumentResponse};
use super::request_types::RequestTypeResponse;
use super::users::UserResponse;
use crate::auth::{
    roles::{ADMIN_ONLY, STAFF},
    AuthenticatedUser,
};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{ensure_transition, new_reference_number, Priority, RequestStatus};
use crate::models::{
    NewStatusHistoryEntry, NewStudentRequest, RequestType, StudentRequest, User,
};
use crate::schema::{request_documents, request_types, requests, status_history, users};
use crate::state::AppState;
use crate::utils::json::{
    nullable_datetime, nullable_uuid, present_string, reference_id, reference_ids,
    required_string,
};
use crate::utils::time::to_iso;

/// A request with its type, people and attachments resolved inline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "numero_reference")]
    pub reference: String,
    #[serde(rename = "type_requete")]
    pub request_type: Option<RequestTypeResponse>,
    #[serde(rename = "titre")]
    pub title: String,
    pub description: String,
    #[serde(rename = "priorite")]
    pub priority: String,
    #[serde(rename = "statut")]
    pub status: String,
    #[serde(rename = "etudiant_id")]
    pub student: Option<UserResponse>,
    #[serde(rename = "agent_assigne_id", default)]
    pub assigned_agent: Option<UserResponse>,
    #[serde(rename = "date_creation")]
    pub created_at: String,
    #[serde(rename = "date_limite", default)]
    pub deadline: Option<String>,
    #[serde(rename = "date_derniere_maj")]
    pub updated_at: String,
    #[serde(rename = "documents_joints", default)]
    pub documents: Vec<DocumentResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestListQuery {
    pub statut: Option<String>,
    pub priorite: Option<String>,
    pub type_requete: Option<Uuid>,
    pub etudiant_id: Option<Uuid>,
    pub agent_assigne_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub statut: String,
    #[serde(default)]
    pub commentaire: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = requests)]
struct UpdateRequestChangeset {
    reference: Option<String>,
    request_type_id: Option<Uuid>,
    title: Option<String>,
    description: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    student_id: Option<Uuid>,
    assigned_agent_id: Option<Option<Uuid>>,
    deadline: Option<Option<NaiveDateTime>>,
    updated_at: NaiveDateTime,
}

fn parse_status(value: &str) -> AppResult<RequestStatus> {
    value.parse::<RequestStatus>().map_err(AppError::bad_request)
}

fn parse_priority(value: &str) -> AppResult<Priority> {
    value.parse::<Priority>().map_err(AppError::bad_request)
}

/// Required reference field: a bare id or a populated object.
fn required_reference(body: &Value, key: &str) -> AppResult<Uuid> {
    match body.get(key) {
        None | Some(Value::Null) => Err(AppError::missing_field(key)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Err(AppError::missing_field(key)),
        Some(value) => reference_id(value)
            .ok_or_else(|| AppError::bad_request(format!("{key} must be a valid id"))),
    }
}

fn optional_reference(body: &Value, key: &str) -> AppResult<Option<Uuid>> {
    match body.get(key) {
        None => Ok(None),
        Some(_) => required_reference(body, key).map(Some),
    }
}

/// Resolves type, student, agent and attachments for every row in one pass.
pub(crate) fn resolve_requests(
    conn: &mut PgConnection,
    rows: Vec<StudentRequest>,
) -> AppResult<Vec<RequestResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let type_ids: HashSet<Uuid> = rows.iter().map(|row| row.request_type_id).collect();
    let user_ids: HashSet<Uuid> = rows
        .iter()
        .flat_map(|row| std::iter::once(row.student_id).chain(row.assigned_agent_id))
        .collect();
    let request_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let types: HashMap<Uuid, RequestType> = request_types::table
        .filter(request_types::id.eq_any(type_ids.into_iter().collect::<Vec<_>>()))
        .load::<RequestType>(conn)?
        .into_iter()
        .map(|row| (row.id, row))
        .collect();
    let people: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(user_ids.into_iter().collect::<Vec<_>>()))
        .load::<User>(conn)?
        .into_iter()
        .map(|row| (row.id, row))
        .collect();
    let mut documents = load_documents_for_requests(conn, &request_ids)?;

    Ok(rows
        .into_iter()
        .map(|row| RequestResponse {
            id: row.id,
            reference: row.reference,
            request_type: types
                .get(&row.request_type_id)
                .cloned()
                .map(RequestTypeResponse::from),
            title: row.title,
            description: row.description,
            priority: row.priority,
            status: row.status,
            student: people.get(&row.student_id).cloned().map(UserResponse::from),
            assigned_agent: row
                .assigned_agent_id
                .and_then(|id| people.get(&id).cloned())
                .map(UserResponse::from),
            created_at: to_iso(row.created_at),
            deadline: row.deadline.map(to_iso),
            updated_at: to_iso(row.updated_at),
            documents: documents.remove(&row.id).unwrap_or_default(),
        })
        .collect())
}

fn resolve_one(conn: &mut PgConnection, row: StudentRequest) -> AppResult<RequestResponse> {
    resolve_requests(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

fn replace_documents(
    conn: &mut PgConnection,
    request_id: Uuid,
    document_ids: &[Uuid],
) -> QueryResult<()> {
    diesel::delete(request_documents::table.filter(request_documents::request_id.eq(request_id)))
        .execute(conn)?;
    for document_id in document_ids {
        attach_document(conn, request_id, *document_id)?;
    }
    Ok(())
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestListQuery>,
) -> AppResult<Json<Vec<RequestResponse>>> {
    let mut conn = state.db()?;

    let mut sql = requests::table.into_boxed();
    if let Some(status) = query.statut.as_deref().filter(|value| !value.is_empty()) {
        sql = sql.filter(requests::status.eq(parse_status(status)?.as_str()));
    }
    if let Some(priority) = query.priorite.as_deref().filter(|value| !value.is_empty()) {
        sql = sql.filter(requests::priority.eq(parse_priority(priority)?.as_str()));
    }
    if let Some(type_id) = query.type_requete {
        sql = sql.filter(requests::request_type_id.eq(type_id));
    }
    if let Some(student_id) = query.etudiant_id {
        sql = sql.filter(requests::student_id.eq(student_id));
    }
    if let Some(agent_id) = query.agent_assigne_id {
        sql = sql.filter(requests::assigned_agent_id.eq(agent_id));
    }

    let rows: Vec<StudentRequest> = sql.order(requests::created_at.desc()).load(&mut conn)?;
    Ok(Json(resolve_requests(&mut conn, rows)?))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RequestResponse>> {
    let mut conn = state.db()?;
    let row: StudentRequest = requests::table.find(request_id).first(&mut conn)?;
    Ok(Json(resolve_one(&mut conn, row)?))
}

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<RequestResponse>)> {
    let request_type_id = required_reference(&body, "type_requete")?;
    let title = required_string(&body, "titre").ok_or_else(|| AppError::missing_field("titre"))?;
    let description = required_string(&body, "description")
        .ok_or_else(|| AppError::missing_field("description"))?;
    let student_id = required_reference(&body, "etudiant_id")?;

    let reference = required_string(&body, "numero_reference").unwrap_or_else(new_reference_number);
    let priority = match required_string(&body, "priorite") {
        Some(value) => parse_priority(&value)?,
        None => Priority::default(),
    };
    let status = match required_string(&body, "statut") {
        Some(value) => parse_status(&value)?,
        None => RequestStatus::default(),
    };
    let assigned_agent_id = nullable_uuid(&body, "agent_assigne_id")
        .map_err(AppError::bad_request)?
        .flatten();
    let deadline = nullable_datetime(&body, "date_limite")
        .map_err(AppError::bad_request)?
        .flatten();
    let document_ids = reference_ids(&body, "documents_joints")
        .map_err(AppError::bad_request)?
        .unwrap_or_default();

    let new_request = NewStudentRequest {
        id: Uuid::new_v4(),
        reference,
        request_type_id,
        title,
        description,
        priority: priority.as_str().to_string(),
        status: status.as_str().to_string(),
        student_id,
        assigned_agent_id,
        deadline,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let created = conn.transaction::<StudentRequest, diesel::result::Error, _>(|conn| {
        let created: StudentRequest = diesel::insert_into(requests::table)
            .values(&new_request)
            .get_result(conn)?;
        replace_documents(conn, created.id, &document_ids)?;
        Ok(created)
    })?;

    info!(
        request_id = %created.id,
        reference = %created.reference,
        created_by = %user.user_id,
        "request created"
    );
    Ok((StatusCode::CREATED, Json(resolve_one(&mut conn, created)?)))
}

/// Writes every provided field verbatim, status included; no transition check.
pub async fn update_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<RequestResponse>> {
    user.require_any(STAFF)?;

    let changeset = UpdateRequestChangeset {
        reference: present_string(&body, "numero_reference").map_err(AppError::bad_request)?,
        request_type_id: optional_reference(&body, "type_requete")?,
        title: present_string(&body, "titre").map_err(AppError::bad_request)?,
        description: present_string(&body, "description").map_err(AppError::bad_request)?,
        priority: present_string(&body, "priorite")
            .map_err(AppError::bad_request)?
            .map(|value| parse_priority(&value).map(|p| p.as_str().to_string()))
            .transpose()?,
        status: present_string(&body, "statut")
            .map_err(AppError::bad_request)?
            .map(|value| parse_status(&value).map(|s| s.as_str().to_string()))
            .transpose()?,
        student_id: optional_reference(&body, "etudiant_id")?,
        assigned_agent_id: match body.get("agent_assigne_id") {
            Some(value @ Value::Object(_)) => Some(Some(reference_id(value).ok_or_else(|| {
                AppError::bad_request("agent_assigne_id must be a valid id")
            })?)),
            _ => nullable_uuid(&body, "agent_assigne_id").map_err(AppError::bad_request)?,
        },
        deadline: nullable_datetime(&body, "date_limite").map_err(AppError::bad_request)?,
        updated_at: Utc::now().naive_utc(),
    };
    let document_ids = reference_ids(&body, "documents_joints").map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let updated = conn.transaction::<StudentRequest, diesel::result::Error, _>(|conn| {
        let updated: StudentRequest = diesel::update(requests::table.find(request_id))
            .set(&changeset)
            .get_result(conn)?;
        if let Some(document_ids) = &document_ids {
            replace_documents(conn, request_id, document_ids)?;
        }
        Ok(updated)
    })?;

    info!(
        request_id = %updated.id,
        status = %updated.status,
        updated_by = %user.user_id,
        "request updated"
    );
    Ok(Json(resolve_one(&mut conn, updated)?))
}

/// Checked status change: the move must be in the transition table and is
/// recorded in the status history in the same transaction.
pub async fn transition_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<RequestResponse>> {
    user.require_any(STAFF)?;
    let next = parse_status(&payload.statut)?;
    let comment = payload
        .commentaire
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let mut conn = state.db()?;
    let updated = conn.transaction::<StudentRequest, AppError, _>(|conn| {
        let current: StudentRequest = requests::table
            .find(request_id)
            .for_update()
            .first(conn)?;
        let from = current
            .status
            .parse::<RequestStatus>()
            .map_err(AppError::internal)?;
        ensure_transition(from, next)?;

        let updated: StudentRequest = diesel::update(requests::table.find(request_id))
            .set((
                requests::status.eq(next.as_str()),
                requests::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?;

        diesel::insert_into(status_history::table)
            .values(&NewStatusHistoryEntry {
                id: Uuid::new_v4(),
                request_id,
                old_status: from.as_str().to_string(),
                new_status: next.as_str().to_string(),
                comment: comment.clone(),
                agent_id: Some(user.user_id),
            })
            .execute(conn)?;

        Ok(updated)
    })?;

    info!(
        request_id = %updated.id,
        status = %updated.status,
        agent_id = %user.user_id,
        "request status changed"
    );
    Ok(Json(resolve_one(&mut conn, updated)?))
}

pub async fn delete_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    user.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;

    let deleted = diesel::delete(requests::table.find(request_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    info!(request_id = %request_id, deleted_by = %user.user_id, "request deleted");
    Ok(Json(json!({ "message": "request deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_reference_names_missing_fields() {
        let err = required_reference(&json!({}), "type_requete").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("type_requete"));

        let err = required_reference(&json!({"etudiant_id": ""}), "etudiant_id").unwrap_err();
        assert!(err.message().contains("etudiant_id"));

        let err = required_reference(&json!({"etudiant_id": "abc"}), "etudiant_id").unwrap_err();
        assert!(err.message().contains("valid id"));
    }

    #[test]
    fn required_reference_accepts_populated_objects() {
        let id = Uuid::new_v4();
        let body = json!({"type_requete": {"_id": id.to_string(), "nom": "Relevé"}});
        assert_eq!(required_reference(&body, "type_requete").unwrap(), id);
        assert_eq!(optional_reference(&json!({}), "type_requete").unwrap(), None);
    }

    #[test]
    fn status_and_priority_parsing_reject_unknown_values() {
        assert_eq!(parse_status("Validée").unwrap(), RequestStatus::Validated);
        assert!(parse_status("Archivée").is_err());
        assert_eq!(parse_priority("Urgente").unwrap(), Priority::Urgent);
        assert!(parse_priority("Critique").is_err());
    }

    #[test]
    fn response_uses_wire_field_names() {
        let response = RequestResponse {
            id: Uuid::nil(),
            reference: "REQ-1".into(),
            request_type: None,
            title: "t".into(),
            description: "d".into(),
            priority: "Normale".into(),
            status: "Soumise".into(),
            student: None,
            assigned_agent: None,
            created_at: "2024-01-01T00:00:00+00:00".into(),
            deadline: None,
            updated_at: "2024-01-01T00:00:00+00:00".into(),
            documents: vec![],
        };
        let value = serde_json::to_value(&response).unwrap();
        for key in [
            "_id",
            "numero_reference",
            "type_requete",
            "titre",
            "priorite",
            "statut",
            "etudiant_id",
            "agent_assigne_id",
            "date_creation",
            "date_limite",
            "date_derniere_maj",
            "documents_joints",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
