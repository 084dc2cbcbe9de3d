use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{roles::ADMIN_ONLY, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{NewRequestType, RequestType};
use crate::schema::{request_types, requests};
use crate::state::AppState;
use crate::utils::json::{nullable_string, present_string, required_string};

const DEFAULT_STANDARD_DELAY_DAYS: i32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTypeResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "delai_standard")]
    pub standard_delay_days: i32,
    #[serde(rename = "documents_requis", default)]
    pub required_documents: Vec<String>,
    #[serde(rename = "formulaire_specifique", default)]
    pub form_schema: Option<Value>,
}

impl From<RequestType> for RequestTypeResponse {
    fn from(value: RequestType) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            standard_delay_days: value.standard_delay_days,
            required_documents: value.required_documents,
            form_schema: value.form_schema,
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = request_types)]
struct UpdateRequestTypeChangeset {
    name: Option<String>,
    description: Option<Option<String>>,
    standard_delay_days: Option<i32>,
    required_documents: Option<Vec<String>>,
    form_schema: Option<Option<Value>>,
}

impl UpdateRequestTypeChangeset {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.standard_delay_days.is_none()
            && self.required_documents.is_none()
            && self.form_schema.is_none()
    }
}

fn parse_delay(body: &Value) -> AppResult<Option<i32>> {
    match body.get("delai_standard") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|days| i32::try_from(days).ok())
            .filter(|days| *days >= 0)
            .map(Some)
            .ok_or_else(|| AppError::bad_request("delai_standard must be a positive number of days")),
    }
}

fn parse_required_documents(body: &Value) -> AppResult<Option<Vec<String>>> {
    match body.get("documents_requis") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|value| value.trim().to_string())
                    .ok_or_else(|| AppError::bad_request("documents_requis must be a list of strings"))
            })
            .collect::<AppResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(AppError::bad_request("documents_requis must be a list of strings")),
    }
}

fn parse_form_schema(body: &Value) -> AppResult<Option<Option<Value>>> {
    match body.get("formulaire_specifique") {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(value @ Value::Object(_)) => Ok(Some(Some(value.clone()))),
        Some(_) => Err(AppError::bad_request("formulaire_specifique must be an object")),
    }
}

pub async fn list_request_types(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<RequestTypeResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<RequestType> = request_types::table
        .order(request_types::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(RequestTypeResponse::from).collect()))
}

pub async fn get_request_type(
    State(state): State<AppState>,
    Path(type_id): Path<Uuid>,
) -> AppResult<Json<RequestTypeResponse>> {
    let mut conn = state.db()?;
    let row: RequestType = request_types::table.find(type_id).first(&mut conn)?;
    Ok(Json(row.into()))
}

pub async fn create_request_type(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<RequestTypeResponse>)> {
    caller.require_any(ADMIN_ONLY)?;

    let name = required_string(&body, "nom").ok_or_else(|| AppError::missing_field("nom"))?;
    let new_type = NewRequestType {
        id: Uuid::new_v4(),
        name,
        description: nullable_string(&body, "description")
            .map_err(AppError::bad_request)?
            .flatten(),
        standard_delay_days: parse_delay(&body)?.unwrap_or(DEFAULT_STANDARD_DELAY_DAYS),
        required_documents: parse_required_documents(&body)?.unwrap_or_default(),
        form_schema: parse_form_schema(&body)?.flatten(),
    };

    let mut conn = state.db()?;
    let created: RequestType = diesel::insert_into(request_types::table)
        .values(&new_type)
        .get_result(&mut conn)?;

    info!(request_type_id = %created.id, name = %created.name, "request type created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn update_request_type(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(type_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<RequestTypeResponse>> {
    caller.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;
    let existing: RequestType = request_types::table.find(type_id).first(&mut conn)?;

    let changeset = UpdateRequestTypeChangeset {
        name: present_string(&body, "nom").map_err(AppError::bad_request)?,
        description: nullable_string(&body, "description").map_err(AppError::bad_request)?,
        standard_delay_days: parse_delay(&body)?,
        required_documents: parse_required_documents(&body)?,
        form_schema: parse_form_schema(&body)?,
    };
    if changeset.is_empty() {
        return Ok(Json(existing.into()));
    }

    let updated: RequestType = diesel::update(request_types::table.find(type_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    info!(request_type_id = %updated.id, "request type updated");
    Ok(Json(updated.into()))
}

pub async fn delete_request_type(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(type_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;

    let usage: i64 = requests::table
        .filter(requests::request_type_id.eq(type_id))
        .select(count_star())
        .first(&mut conn)?;
    if usage > 0 {
        return Err(AppError::bad_request(
            "cannot delete a request type that is still used by requests",
        )
        .with_details(json!({ "requests": usage })));
    }

    let deleted = diesel::delete(request_types::table.find(type_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    info!(request_type_id = %type_id, "request type deleted");
    Ok(Json(json!({ "message": "request type deleted" })))
}
