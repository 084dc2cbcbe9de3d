use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::roles::Role;
use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::days(config.jwt_expiry_days),
        })
    }

    pub fn generate_token(&self, user_id: Uuid, role: Role) -> Result<String> {
        self.generate_token_at(user_id, role, Utc::now())
    }

    /// Issues a token as if it had been signed at `issued_at`.
    pub fn generate_token_at(
        &self,
        user_id: Uuid,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> Result<String> {
        let exp = issued_at + self.expiry;
        let claims = Claims {
            sub: user_id,
            role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn service() -> JwtService {
        let mut config = AppConfig::defaults();
        config.jwt_secret = "unit-secret".to_string();
        JwtService::from_config(&config).unwrap()
    }

    #[test]
    fn issues_and_verifies_tokens() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt.generate_token(user_id, Role::Agent).unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Agent);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn rejects_tokens_older_than_the_validity_window() {
        let jwt = service();
        let issued = Utc::now() - Duration::days(8);
        let token = jwt
            .generate_token_at(Uuid::new_v4(), Role::Student, issued)
            .unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let jwt = service();
        let mut other_config = AppConfig::defaults();
        other_config.jwt_secret = "other".to_string();
        let other = JwtService::from_config(&other_config).unwrap();
        let token = other.generate_token(Uuid::new_v4(), Role::Admin).unwrap();
        assert!(jwt.verify_token(&token).is_err());
    }
}
