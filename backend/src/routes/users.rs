use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{
    password,
    roles::{Role, ADMIN_ONLY, MANAGERS},
    AuthenticatedUser,
};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User, USER_STATUS_ACTIVE, USER_STATUS_INACTIVE};
use crate::schema::users;
use crate::state::AppState;
use crate::utils::json::{nullable_string, present_string, required_string};
use crate::utils::time::to_iso;

/// Public projection of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub matricule: String,
    #[serde(rename = "nom")]
    pub last_name: String,
    #[serde(rename = "prenom")]
    pub first_name: String,
    pub email: String,
    #[serde(rename = "telephone", default)]
    pub phone: Option<String>,
    pub role: String,
    #[serde(rename = "faculte", default)]
    pub faculty: Option<String>,
    #[serde(rename = "departement", default)]
    pub department: Option<String>,
    #[serde(rename = "date_creation")]
    pub created_at: String,
    #[serde(rename = "derniere_connexion", default)]
    pub last_login_at: Option<String>,
    #[serde(rename = "statut")]
    pub status: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            matricule: user.matricule,
            last_name: user.last_name,
            first_name: user.first_name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            faculty: user.faculty,
            department: user.department,
            created_at: to_iso(user.created_at),
            last_login_at: user.last_login_at.map(to_iso),
            status: user.status,
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    matricule: Option<String>,
    last_name: Option<String>,
    first_name: Option<String>,
    email: Option<String>,
    phone: Option<Option<String>>,
    password_hash: Option<String>,
    role: Option<String>,
    faculty: Option<Option<String>>,
    department: Option<Option<String>>,
    status: Option<String>,
}

impl UpdateUserChangeset {
    fn is_empty(&self) -> bool {
        self.matricule.is_none()
            && self.last_name.is_none()
            && self.first_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.faculty.is_none()
            && self.department.is_none()
            && self.status.is_none()
    }
}

/// `mot_de_passe` is the historical field name; `password` is accepted too.
pub(crate) fn password_field(body: &Value) -> Option<String> {
    body.get("mot_de_passe")
        .or_else(|| body.get("password"))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

fn parse_user_status(value: &str) -> AppResult<String> {
    match value {
        USER_STATUS_ACTIVE | USER_STATUS_INACTIVE => Ok(value.to_string()),
        other => Err(AppError::bad_request(format!("unknown user status: {other}"))),
    }
}

/// Validates the shared account fields and builds the row to insert.
pub(crate) fn build_new_user(body: &Value, role: Role) -> AppResult<NewUser> {
    let matricule = required_string(body, "matricule").ok_or_else(|| AppError::missing_field("matricule"))?;
    let last_name = required_string(body, "nom").ok_or_else(|| AppError::missing_field("nom"))?;
    let first_name =
        required_string(body, "prenom").ok_or_else(|| AppError::missing_field("prenom"))?;
    let email = required_string(body, "email").ok_or_else(|| AppError::missing_field("email"))?;
    let password =
        password_field(body).ok_or_else(|| AppError::missing_field("mot_de_passe"))?;

    let status = match required_string(body, "statut") {
        Some(value) => parse_user_status(&value)?,
        None => USER_STATUS_ACTIVE.to_string(),
    };

    let password_hash = password::hash_password(&password)?;

    Ok(NewUser {
        id: Uuid::new_v4(),
        matricule,
        last_name,
        first_name,
        email: normalize_email(&email),
        phone: nullable_string(body, "telephone")
            .map_err(AppError::bad_request)?
            .flatten(),
        password_hash,
        role: role.as_str().to_string(),
        faculty: nullable_string(body, "faculte")
            .map_err(AppError::bad_request)?
            .flatten(),
        department: nullable_string(body, "departement")
            .map_err(AppError::bad_request)?
            .flatten(),
        status,
    })
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_any(MANAGERS)?;
    let mut conn = state.db()?;

    let rows: Vec<User> = users::table
        .order((users::last_name.asc(), users::first_name.asc()))
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let found: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(found.into()))
}

pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    caller.require_any(MANAGERS)?;

    let role = required_string(&body, "role")
        .ok_or_else(|| AppError::missing_field("role"))?
        .parse::<Role>()
        .map_err(AppError::bad_request)?;
    let new_user = build_new_user(&body, role)?;

    let mut conn = state.db()?;
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)?;

    let created: User = users::table.find(new_user.id).first(&mut conn)?;
    info!(
        user_id = %created.id,
        role = %created.role,
        created_by = %caller.user_id,
        "user created"
    );
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<UserResponse>> {
    caller.require_any(MANAGERS)?;
    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;

    let mut changeset = UpdateUserChangeset {
        matricule: present_string(&body, "matricule").map_err(AppError::bad_request)?,
        last_name: present_string(&body, "nom").map_err(AppError::bad_request)?,
        first_name: present_string(&body, "prenom").map_err(AppError::bad_request)?,
        email: present_string(&body, "email")
            .map_err(AppError::bad_request)?
            .map(|email| normalize_email(&email)),
        phone: nullable_string(&body, "telephone").map_err(AppError::bad_request)?,
        faculty: nullable_string(&body, "faculte").map_err(AppError::bad_request)?,
        department: nullable_string(&body, "departement").map_err(AppError::bad_request)?,
        ..Default::default()
    };

    if let Some(role) = present_string(&body, "role").map_err(AppError::bad_request)? {
        let role = role.parse::<Role>().map_err(AppError::bad_request)?;
        changeset.role = Some(role.as_str().to_string());
    }
    if let Some(status) = present_string(&body, "statut").map_err(AppError::bad_request)? {
        changeset.status = Some(parse_user_status(&status)?);
    }
    if let Some(password) = password_field(&body) {
        changeset.password_hash = Some(password::hash_password(&password)?);
    }

    if changeset.is_empty() {
        return Ok(Json(existing.into()));
    }

    diesel::update(users::table.find(user_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    info!(user_id = %updated.id, updated_by = %caller.user_id, "user updated");
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    caller.require_any(ADMIN_ONLY)?;
    let mut conn = state.db()?;

    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    info!(user_id = %user_id, deleted_by = %caller.user_id, "user deleted");
    Ok(Json(json!({ "message": "user deleted" })))
}
