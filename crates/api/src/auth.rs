//! Minimal bearer-token authentication for the checkout endpoint.
//!
//! The website's auth/session machinery lives upstream; this server only
//! needs to know *which* user is checking out, if any. Guests carry no
//! token and check out with an email hint.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn decode(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        Ok(jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }
}

/// The authenticated requester.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// Optional-auth extractor: `None` for guests. An invalid or expired token
/// also resolves to `None` (logged), since every endpoint using this
/// extractor accepts guests anyway.
pub struct MaybeUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let user = match token {
            Some(token) => match app_state.jwt.decode(token) {
                Ok(claims) => Some(AuthUser {
                    user_id: claims.sub,
                    email: claims.email,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid bearer token");
                    None
                }
            },
            None => None,
        };

        Ok(MaybeUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: Uuid,
        email: Option<String>,
        exp: usize,
    }

    fn token(secret: &str, exp_offset: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let exp = (time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset) as usize;
        let claims = TestClaims {
            sub: user_id,
            email: Some("client@example.com".to_string()),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (user_id, token)
    }

    #[test]
    fn decodes_valid_token() {
        let manager = JwtManager::new("secret");
        let (user_id, token) = token("secret", 3600);

        let claims = manager.decode(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email.as_deref(), Some("client@example.com"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let manager = JwtManager::new("secret");
        let (_, token) = token("other-secret", 3600);
        assert!(manager.decode(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let manager = JwtManager::new("secret");
        let (_, token) = token("secret", -3600);
        assert!(manager.decode(&token).is_err());
    }
}
