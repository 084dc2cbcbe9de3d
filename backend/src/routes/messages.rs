use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::documents::DocumentResponse;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Document, Message, NewMessage, NewMessageDocument, User};
use crate::schema::{documents, message_documents, messages, users};
use crate::state::AppState;
use crate::utils::json::{reference_id, reference_ids, required_string};
use crate::utils::time::to_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "nom")]
    pub last_name: String,
    #[serde(rename = "prenom")]
    pub first_name: String,
    pub role: String,
}

impl From<User> for SenderResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            last_name: user.last_name,
            first_name: user.first_name,
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "requete_id")]
    pub request_id: Uuid,
    #[serde(rename = "expediteur_id")]
    pub sender: Option<SenderResponse>,
    #[serde(rename = "contenu")]
    pub content: String,
    #[serde(rename = "fichiers_joints", default)]
    pub attachments: Vec<DocumentResponse>,
    #[serde(rename = "date_envoi")]
    pub sent_at: String,
    #[serde(rename = "lu")]
    pub is_read: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub requete_id: Option<Uuid>,
}

fn resolve_messages(
    conn: &mut PgConnection,
    rows: Vec<Message>,
) -> AppResult<Vec<MessageResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let sender_ids: HashSet<Uuid> = rows.iter().map(|row| row.sender_id).collect();
    let message_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let senders: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(sender_ids.into_iter().collect::<Vec<_>>()))
        .load::<User>(conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let attachment_rows: Vec<(Uuid, Document)> = message_documents::table
        .inner_join(documents::table)
        .filter(message_documents::message_id.eq_any(&message_ids))
        .order(documents::uploaded_at.asc())
        .select((message_documents::message_id, documents::all_columns))
        .load(conn)?;
    let mut attachments: HashMap<Uuid, Vec<DocumentResponse>> = HashMap::new();
    for (message_id, doc) in attachment_rows {
        attachments.entry(message_id).or_default().push(doc.into());
    }

    Ok(rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id,
            request_id: row.request_id,
            sender: senders.get(&row.sender_id).cloned().map(SenderResponse::from),
            content: row.content,
            attachments: attachments.remove(&row.id).unwrap_or_default(),
            sent_at: to_iso(row.sent_at),
            is_read: row.is_read,
        })
        .collect())
}

fn resolve_one(conn: &mut PgConnection, row: Message) -> AppResult<MessageResponse> {
    resolve_messages(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageListQuery>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut conn = state.db()?;
    let mut sql = messages::table.into_boxed();
    if let Some(request_id) = query.requete_id {
        sql = sql.filter(messages::request_id.eq(request_id));
    }
    let rows: Vec<Message> = sql.order(messages::sent_at.asc()).load(&mut conn)?;
    Ok(Json(resolve_messages(&mut conn, rows)?))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    let row: Message = messages::table.find(message_id).first(&mut conn)?;
    Ok(Json(resolve_one(&mut conn, row)?))
}

pub async fn list_request_messages(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Message> = messages::table
        .filter(messages::request_id.eq(request_id))
        .order(messages::sent_at.asc())
        .load(&mut conn)?;
    Ok(Json(resolve_messages(&mut conn, rows)?))
}

/// Persists a message from the caller, then relays it to the request's room.
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let request_id = match body.get("requete_id") {
        None | Some(Value::Null) => return Err(AppError::missing_field("requete_id")),
        Some(value) => reference_id(value)
            .ok_or_else(|| AppError::bad_request("requete_id must be a valid id"))?,
    };
    let content =
        required_string(&body, "contenu").ok_or_else(|| AppError::missing_field("contenu"))?;
    let attachment_ids = reference_ids(&body, "fichiers_joints")
        .map_err(AppError::bad_request)?
        .unwrap_or_default();

    let new_message = NewMessage {
        id: Uuid::new_v4(),
        request_id,
        sender_id: user.user_id,
        content,
    };

    let mut conn = state.db()?;
    let created = conn.transaction::<Message, diesel::result::Error, _>(|conn| {
        let created: Message = diesel::insert_into(messages::table)
            .values(&new_message)
            .get_result(conn)?;
        let links: Vec<NewMessageDocument> = attachment_ids
            .iter()
            .map(|document_id| NewMessageDocument {
                message_id: created.id,
                document_id: *document_id,
            })
            .collect();
        if !links.is_empty() {
            diesel::insert_into(message_documents::table)
                .values(&links)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(created)
    })?;
    let response = resolve_one(&mut conn, created)?;
    drop(conn);

    match serde_json::to_value(&response) {
        Ok(payload) => {
            let delivered = state
                .realtime
                .broadcast_message(&request_id.to_string(), &payload)
                .await;
            info!(
                message_id = %response.id,
                request_id = %request_id,
                sender_id = %user.user_id,
                delivered,
                "message created"
            );
        }
        Err(err) => warn!(error = %err, message_id = %response.id, "message not relayed"),
    }

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    let updated: Message = diesel::update(messages::table.find(message_id))
        .set(messages::is_read.eq(true))
        .get_result(&mut conn)?;
    Ok(Json(resolve_one(&mut conn, updated)?))
}
