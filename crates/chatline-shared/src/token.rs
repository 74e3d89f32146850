//! Credential token codec.
//!
//! Tokens are HS256 JWTs naming the user in a `userId` claim. The auth
//! service issues them; the chatline server only verifies them. Both sides
//! go through [`TokenCodec`] so they agree on claims and algorithm.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_TTL_SECS;
use crate::error::AuthError;
use crate::types::UserId;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self::with_ttl(secret, TOKEN_TTL_SECS)
    }

    pub fn with_ttl(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    pub fn issue(&self, user_id: &UserId) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.0.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Check signature and expiry, returning the user the token names.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        let user_id = UserId(data.claims.user_id);
        if user_id.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(user_id)
    }
}
