use std::collections::HashMap;

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use diesel::{dsl::max, prelude::*, PgConnection};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{
    roles::{ADMIN_ONLY, STAFF},
    AuthenticatedUser,
};
use crate::error::{AppError, AppResult};
use crate::models::{Document, NewDocument, NewRequestDocument};
use crate::schema::{documents, request_documents, requests};
use crate::state::AppState;
use crate::storage::{generate_stored_name, is_allowed_mime_type};
use crate::utils::json::{nullable_uuid, present_string, required_string};
use crate::utils::time::to_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "nom_fichier")]
    pub filename: String,
    #[serde(rename = "chemin")]
    pub storage_path: String,
    #[serde(rename = "type_mime")]
    pub mime_type: String,
    #[serde(rename = "taille")]
    pub size_bytes: i64,
    #[serde(rename = "requete_id", default)]
    pub request_id: Option<Uuid>,
    #[serde(rename = "uploade_par", default)]
    pub uploaded_by: Option<Uuid>,
    #[serde(rename = "date_upload")]
    pub uploaded_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            storage_path: doc.storage_path,
            mime_type: doc.mime_type,
            size_bytes: doc.size_bytes,
            request_id: doc.request_id,
            uploaded_by: doc.uploaded_by,
            uploaded_at: to_iso(doc.uploaded_at),
        }
    }
}

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub requete_id: Option<Uuid>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = documents)]
struct UpdateDocumentChangeset {
    filename: Option<String>,
    request_id: Option<Option<Uuid>>,
}

/// Punctuation left as-is in the RFC 5987 `filename*` value.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_');

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();

    let encoded = percent_encoding::utf8_percent_encode(&sanitized, FILENAME_ENCODE_SET);
    format!("attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

/// Attached documents per request, in attachment order.
pub(crate) fn load_documents_for_requests(
    conn: &mut PgConnection,
    request_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<DocumentResponse>>> {
    if request_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, Document)> = request_documents::table
        .inner_join(documents::table)
        .filter(request_documents::request_id.eq_any(request_ids))
        .order((
            request_documents::request_id.asc(),
            request_documents::position.asc(),
        ))
        .select((request_documents::request_id, documents::all_columns))
        .load(conn)?;

    let mut map: HashMap<Uuid, Vec<DocumentResponse>> = HashMap::new();
    for (request_id, doc) in rows {
        map.entry(request_id).or_default().push(doc.into());
    }
    Ok(map)
}

/// Appends `document_id` to the request's attachment list unless it is already there.
pub(crate) fn attach_document(
    conn: &mut PgConnection,
    request_id: Uuid,
    document_id: Uuid,
) -> QueryResult<()> {
    let next_position: Option<i32> = request_documents::table
        .filter(request_documents::request_id.eq(request_id))
        .select(max(request_documents::position))
        .first(conn)?;

    diesel::insert_into(request_documents::table)
        .values(&NewRequestDocument {
            request_id,
            document_id,
            position: next_position.map(|pos| pos + 1).unwrap_or(0),
        })
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;

    let mut sql = documents::table.into_boxed();
    if let Some(request_id) = query.requete_id {
        sql = sql.filter(documents::request_id.eq(request_id));
    }
    let rows: Vec<Document> = sql.order(documents::uploaded_at.desc()).load(&mut conn)?;

    Ok(Json(rows.into_iter().map(DocumentResponse::from).collect()))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    Ok(Json(doc.into()))
}

/// Registers metadata for a file that is already stored.
pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let filename =
        required_string(&body, "nom_fichier").ok_or_else(|| AppError::missing_field("nom_fichier"))?;
    let storage_path =
        required_string(&body, "chemin").ok_or_else(|| AppError::missing_field("chemin"))?;
    if !state.storage.is_stored_path(&storage_path) {
        warn!(user_id = %user.user_id, "rejected document path outside uploads directory");
        return Err(AppError::invalid_field(
            "chemin",
            "chemin must point into the uploads directory",
        ));
    }
    let mime_type =
        required_string(&body, "type_mime").ok_or_else(|| AppError::missing_field("type_mime"))?;
    let size_bytes = body
        .get("taille")
        .and_then(Value::as_i64)
        .filter(|size| *size >= 0)
        .ok_or_else(|| AppError::missing_field("taille"))?;
    let request_id = nullable_uuid(&body, "requete_id")
        .map_err(AppError::bad_request)?
        .flatten();

    let new_doc = NewDocument {
        id: Uuid::new_v4(),
        filename,
        storage_path,
        mime_type,
        size_bytes,
        request_id,
        uploaded_by: Some(user.user_id),
    };

    let mut conn = state.db()?;
    let doc: Document = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let doc: Document = diesel::insert_into(documents::table)
            .values(&new_doc)
            .get_result(conn)?;
        if let Some(request_id) = doc.request_id {
            attach_document(conn, request_id, doc.id)?;
        }
        Ok(doc)
    })?;

    info!(document_id = %doc.id, uploaded_by = %user.user_id, "document registered");
    Ok((StatusCode::CREATED, Json(doc.into())))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<DocumentResponse>> {
    user.require_any(STAFF)?;
    let mut conn = state.db()?;
    let existing: Document = documents::table.find(document_id).first(&mut conn)?;

    let changeset = UpdateDocumentChangeset {
        filename: present_string(&body, "nom_fichier").map_err(AppError::bad_request)?,
        request_id: nullable_uuid(&body, "requete_id").map_err(AppError::bad_request)?,
    };
    if changeset.filename.is_none() && changeset.request_id.is_none() {
        return Ok(Json(existing.into()));
    }

    let updated: Document = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let updated: Document = diesel::update(documents::table.find(document_id))
            .set(&changeset)
            .get_result(conn)?;
        if let Some(previous) = existing.request_id.filter(|id| Some(*id) != updated.request_id) {
            diesel::delete(
                request_documents::table
                    .filter(request_documents::request_id.eq(previous))
                    .filter(request_documents::document_id.eq(updated.id)),
            )
            .execute(conn)?;
        }
        if let Some(request_id) = updated.request_id {
            attach_document(conn, request_id, updated.id)?;
        }
        Ok(updated)
    })?;

    info!(document_id = %updated.id, updated_by = %user.user_id, "document updated");
    Ok(Json(updated.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    user.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
    drop(conn);

    if let Err(err) = state.storage.delete_file(&doc.storage_path).await {
        warn!(error = ?err, document_id = %doc.id, "failed to remove stored file");
    }

    info!(document_id = %doc.id, deleted_by = %user.user_id, "document deleted");
    Ok(Json(json!({ "message": "document deleted" })))
}

struct IncomingFile {
    original_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let max_bytes = state.config.max_upload_bytes;
    let mut file: Option<IncomingFile> = None;
    let mut request_id: Option<Uuid> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::from(err)
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or("file").to_string();
                // Declared type first; fall back to the extension.
                let mime_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&original_name)
                            .first_or_octet_stream()
                            .essence_str()
                            .to_string()
                    });
                if !is_allowed_mime_type(&mime_type) {
                    warn!(mime_type = %mime_type, "upload rejected: file type not allowed");
                    return Err(AppError::bad_request(format!(
                        "file type {mime_type} is not allowed"
                    )));
                }

                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await? {
                    if bytes.len() + chunk.len() > max_bytes {
                        warn!(original_name = %original_name, max_bytes, "upload rejected: file too large");
                        return Err(AppError::payload_too_large(format!(
                            "file exceeds the {max_bytes} byte limit"
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                file = Some(IncomingFile {
                    original_name,
                    mime_type,
                    bytes,
                });
            }
            Some("requete_id") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    let parsed = Uuid::parse_str(value.trim())
                        .map_err(|_| AppError::bad_request("requete_id must be a valid id"))?;
                    request_id = Some(parsed);
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::missing_field("file"))?;
    if file.bytes.is_empty() {
        return Err(AppError::bad_request("file must not be empty"));
    }

    if let Some(request_id) = request_id {
        let mut conn = state.db()?;
        let exists = requests::table
            .find(request_id)
            .select(requests::id)
            .first::<Uuid>(&mut conn)
            .optional()?
            .is_some();
        if !exists {
            return Err(AppError::bad_request("requete_id does not match a request"));
        }
    }

    let stored_name = generate_stored_name(&file.original_name);
    let size_bytes = file.bytes.len() as i64;
    let storage_path = state.storage.put_file(&stored_name, file.bytes).await?;

    let new_doc = NewDocument {
        id: Uuid::new_v4(),
        filename: stored_name,
        storage_path: storage_path.clone(),
        mime_type: file.mime_type,
        size_bytes,
        request_id,
        uploaded_by: Some(user.user_id),
    };

    let mut conn = state.db()?;
    let inserted = conn.transaction::<Document, diesel::result::Error, _>(|conn| {
        let doc: Document = diesel::insert_into(documents::table)
            .values(&new_doc)
            .get_result(conn)?;
        if let Some(request_id) = doc.request_id {
            attach_document(conn, request_id, doc.id)?;
        }
        Ok(doc)
    });
    drop(conn);

    let doc = match inserted {
        Ok(doc) => doc,
        Err(err) => {
            error!(error = %err, stored_path = %storage_path, "failed to record uploaded document");
            if let Err(cleanup_err) = state.storage.delete_file(&storage_path).await {
                warn!(error = ?cleanup_err, "failed to remove orphaned upload");
            }
            return Err(err.into());
        }
    };

    info!(
        document_id = %doc.id,
        original_name = %file.original_name,
        size_bytes,
        uploaded_by = %user.user_id,
        "document upload succeeded"
    );
    Ok((StatusCode::CREATED, Json(doc.into())))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    drop(conn);

    let bytes = state.storage.read_file(&doc.storage_path).await.map_err(|err| {
        error!(error = ?err, document_id = %doc.id, "stored file is unreadable");
        AppError::not_found()
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, doc.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                attachment_content_disposition(&doc.filename),
            ),
        ],
        bytes,
    ))
}
