use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::users::{build_new_user, normalize_email, password_field, UserResponse};
use crate::{
    auth::{password, roles::Role, AuthenticatedUser},
    error::{AppError, AppResult},
    models::User,
    schema::users::dsl,
    state::AppState,
    utils::json::required_string,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<Json<LoginResponse>> {
    let email = required_string(&body, "email").ok_or_else(|| AppError::missing_field("email"))?;
    let password_value =
        password_field(&body).ok_or_else(|| AppError::missing_field("mot_de_passe"))?;

    let mut conn = state.db()?;
    let user: User = dsl::users
        .filter(dsl::email.eq(normalize_email(&email)))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| {
            warn!(email = %email, "login for unknown email");
            AppError::unauthorized_because("user not found")
        })?;

    let valid = password::verify_password(&password_value, &user.password_hash)
        .map_err(|_| AppError::unauthorized_because("incorrect password"))?;
    if !valid {
        warn!(user_id = %user.id, "login with incorrect password");
        return Err(AppError::unauthorized_because("incorrect password"));
    }

    let role = user.role.parse::<Role>().map_err(AppError::internal)?;
    let token = state.jwt.generate_token(user.id, role)?;

    let user: User = diesel::update(dsl::users.find(user.id))
        .set(dsl::last_login_at.eq(Some(Utc::now().naive_utc())))
        .get_result(&mut conn)?;

    info!(user_id = %user.id, role = %role, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: user.into(),
    }))
}

/// Self-service sign-up; always creates a student account.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<LoginResponse>)> {
    let new_user = build_new_user(&body, Role::Student)?;

    let mut conn = state.db()?;
    let user: User = diesel::insert_into(dsl::users)
        .values(&new_user)
        .get_result(&mut conn)?;

    let token = state.jwt.generate_token(user.id, Role::Student)?;
    info!(user_id = %user.id, "student registered");
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn me(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.user.into())
}
