//! Signed token issuance and validation.
//!
//! Refresh tokens, password-reset tokens and the client-side CAPTCHA state are
//! all HS256 tokens signed with the same server secret. Expiry is carried as a
//! standard `exp` claim and checked at validation time; an expired credential
//! is treated the same as a cancelled one by callers.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Signing/verification key pair derived from the server secret once at startup.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    #[must_use]
    pub fn from_secret(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }
}

/// Validation outcome; `Expired` is distinct so callers can treat it like a
/// cancelled credential rather than a malformed one.
#[derive(Debug)]
pub(super) enum TokenStatus<C> {
    Valid(C),
    Expired,
    Invalid,
}

impl<C> TokenStatus<C> {
    pub(super) fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct RefreshClaims {
    /// Principal `permanent_id`.
    pub(super) sub: String,
    /// Unique per issued token so repeated logins never collide.
    pub(super) jti: String,
    pub(super) iat: i64,
    pub(super) exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ResetClaims {
    /// Email the reset was requested for.
    pub(super) sub: String,
    pub(super) jti: String,
    pub(super) iat: i64,
    pub(super) exp: i64,
}

pub(super) fn encode_claims<C: Serialize>(keys: &TokenKeys, claims: &C) -> Result<String> {
    encode(&Header::default(), claims, &keys.encoding).context("failed to sign token")
}

pub(super) fn decode_claims<C: DeserializeOwned>(keys: &TokenKeys, token: &str) -> TokenStatus<C> {
    let validation = Validation::new(Algorithm::HS256);
    match decode::<C>(token, &keys.decoding, &validation) {
        Ok(data) => TokenStatus::Valid(data.claims),
        Err(err) => match err.kind() {
            ErrorKind::ExpiredSignature => TokenStatus::Expired,
            _ => TokenStatus::Invalid,
        },
    }
}

pub(super) fn issue_refresh_token(
    keys: &TokenKeys,
    permanent_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = RefreshClaims {
        sub: permanent_id.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + ttl_seconds,
    };
    encode_claims(keys, &claims)
}

pub(super) fn decode_refresh_token(keys: &TokenKeys, token: &str) -> TokenStatus<RefreshClaims> {
    decode_claims(keys, token)
}

pub(super) fn issue_reset_token(keys: &TokenKeys, email: &str, ttl_seconds: i64) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = ResetClaims {
        sub: email.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + ttl_seconds,
    };
    encode_claims(keys, &claims)
}

pub(super) fn decode_reset_token(keys: &TokenKeys, token: &str) -> TokenStatus<ResetClaims> {
    decode_claims(keys, token)
}
