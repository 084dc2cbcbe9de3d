pub mod jwt;
pub mod password;
pub mod roles;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
};

use self::roles::Role;

/// The caller behind a valid bearer token, re-read from the database on every request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
    pub user: User,
}

impl AuthenticatedUser {
    /// Rejects with 403 unless the caller's role is in `allowed`.
    pub fn require_any(&self, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                role = %self.role,
                "role not allowed for route"
            );
            Err(AppError::forbidden())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(existing.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized_because("missing bearer token"))?;

        let claims = state.jwt.verify_token(bearer.token()).map_err(|err| {
            tracing::warn!(error = %err, "rejected bearer token");
            AppError::unauthorized_because("invalid token")
        })?;

        let mut conn = state.db()?;
        let user: User = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::unauthorized_because("user not found"))?;

        // The stored role wins over the one baked into the token.
        let role = user
            .role
            .parse::<Role>()
            .map_err(|_| AppError::unauthorized_because("user has an unknown role"))?;

        let authenticated = AuthenticatedUser {
            user_id: user.id,
            role,
            user,
        };
        parts.extensions.insert(authenticated.clone());
        Ok(authenticated)
    }
}
