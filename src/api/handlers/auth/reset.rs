//! Password reset: single-use, time-boxed tokens bound to an email.
//!
//! The raw token only ever travels inside the reset link; the ledger stores a
//! SHA-256 hash. Consumption flips `cancelled` under the same transaction that
//! rewrites the password hash, so a token can never be spent twice and a
//! failed rewrite leaves the token usable.

use anyhow::{Context, Result};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::email::password_reset_notice;

use super::state::AuthState;
use super::storage::{
    cancel_reset_token, find_principal_by_email, insert_reset_token,
    is_reset_token_cancelled_or_expired, update_password_hash,
};
use super::tokens::{decode_reset_token, issue_reset_token, TokenStatus};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{hash_reset_token, normalize_email, valid_email, valid_password};

#[derive(Debug)]
pub(super) enum ResetRequestOutcome {
    InvalidEmail,
    /// Reported distinctly so the caller can say "user not found" instead of a
    /// generic failure.
    NotFound,
    Sent {
        reset_url: String,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum ResetOutcome {
    /// Bad signature or malformed token.
    Invalid,
    Expired,
    /// Already consumed or revoked; a reused token always lands here.
    Cancelled,
    PasswordMismatch,
    WeakPassword,
    Consumed,
}

/// Issue a reset token for the account behind `email` and hand the link to
/// the email collaborator.
pub(super) async fn request_reset(
    pool: &PgPool,
    state: &AuthState,
    email: &str,
) -> Result<ResetRequestOutcome> {
    let email = normalize_email(email);
    if !valid_email(&email) {
        return Ok(ResetRequestOutcome::InvalidEmail);
    }

    if find_principal_by_email(pool, &email).await?.is_none() {
        return Ok(ResetRequestOutcome::NotFound);
    }

    let ttl_seconds = state.config().reset_token_ttl_seconds();
    let token = issue_reset_token(state.keys(), &email, ttl_seconds)?;
    let token_hash = hash_reset_token(&token);
    insert_reset_token(pool, &token_hash, &email, ttl_seconds).await?;

    let reset_url = build_reset_url(state.config().frontend_base_url(), &token);
    state
        .mailer()
        .send(&password_reset_notice(&email, &reset_url))
        .context("failed to send password reset notice")?;

    Ok(ResetRequestOutcome::Sent { reset_url })
}

/// Validate the token and, in one transaction, rewrite the password hash and
/// consume the token. A second call with the same token returns `Cancelled`.
pub(super) async fn validate_and_consume(
    pool: &PgPool,
    state: &AuthState,
    token: &str,
    new_password: &str,
    confirm_password: &str,
) -> Result<ResetOutcome> {
    let claims = match decode_reset_token(state.keys(), token.trim()) {
        TokenStatus::Valid(claims) => claims,
        TokenStatus::Expired => return Ok(ResetOutcome::Expired),
        TokenStatus::Invalid => return Ok(ResetOutcome::Invalid),
    };

    if new_password != confirm_password {
        return Ok(ResetOutcome::PasswordMismatch);
    }
    if !valid_password(new_password) {
        return Ok(ResetOutcome::WeakPassword);
    }

    let token_hash = hash_reset_token(token.trim());
    if is_reset_token_cancelled_or_expired(pool, &token_hash).await? {
        return Ok(ResetOutcome::Cancelled);
    }

    let password_hash =
        bcrypt::hash(new_password, bcrypt::DEFAULT_COST).context("failed to hash password")?;

    let mut tx = pool.begin().await.context("begin reset transaction")?;

    update_password_hash(&mut tx, &claims.sub, &password_hash).await?;

    // The guarded update is the single-use barrier: losing the race to another
    // consumer shows up as "already cancelled" here.
    if !cancel_reset_token(&mut tx, &token_hash).await? {
        tx.rollback().await.context("rollback reset transaction")?;
        return Ok(ResetOutcome::Cancelled);
    }

    tx.commit().await.context("commit reset transaction")?;
    Ok(ResetOutcome::Consumed)
}

fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Reset link sent"),
        (status = 400, description = "Invalid email", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match request_reset(&pool, &auth_state, &request.email).await {
        Ok(ResetRequestOutcome::InvalidEmail) => {
            (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response()
        }
        Ok(ResetRequestOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, "User not found".to_string()).into_response()
        }
        Ok(ResetRequestOutcome::Sent { .. }) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to request password reset: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset request failed".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password changed and token consumed"),
        (status = 400, description = "Invalid, expired or used token; password rejected", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.token.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    match validate_and_consume(
        &pool,
        &auth_state,
        &request.token,
        &request.new_password,
        &request.confirm_password,
    )
    .await
    {
        Ok(ResetOutcome::Consumed) => StatusCode::NO_CONTENT.into_response(),
        Ok(ResetOutcome::Invalid) => {
            (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response()
        }
        Ok(ResetOutcome::Expired) => {
            (StatusCode::BAD_REQUEST, "Token expired".to_string()).into_response()
        }
        Ok(ResetOutcome::Cancelled) => {
            (StatusCode::BAD_REQUEST, "Token already used".to_string()).into_response()
        }
        Ok(ResetOutcome::PasswordMismatch) => {
            (StatusCode::BAD_REQUEST, "Passwords do not match".to_string()).into_response()
        }
        Ok(ResetOutcome::WeakPassword) => (
            StatusCode::BAD_REQUEST,
            "Password does not meet policy".to_string(),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to reset password: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Reset failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::captcha::NoopCaptchaVerifier;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::tokens::TokenKeys;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("https://app.example.com".to_string()),
            TokenKeys::from_secret(&SecretString::from("sekreta".to_string())),
            Arc::new(NoopCaptchaVerifier),
            Arc::new(LogEmailSender),
        ))
    }

    #[test]
    fn build_reset_url_trims_trailing_slash() {
        let url = build_reset_url("https://app.example.com/", "token");
        assert_eq!(url, "https://app.example.com/reset-password#token=token");
    }

    #[tokio::test]
    async fn forgot_password_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn forgot_password_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ForgotPasswordRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_missing_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_password(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResetPasswordRequest {
                token: "  ".to_string(),
                new_password: "longenough".to_string(),
                confirm_password: "longenough".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_forged_token_is_invalid() -> Result<()> {
        // Signature checks run before any database access.
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = auth_state();
        let outcome =
            validate_and_consume(&pool, &state, "forged-token", "longenough", "longenough").await?;
        assert_eq!(outcome, ResetOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_mismatched_confirmation() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = auth_state();
        let token = issue_reset_token(state.keys(), "alice@example.com", 900)?;
        let outcome = validate_and_consume(&pool, &state, &token, "longenough", "different").await?;
        assert_eq!(outcome, ResetOutcome::PasswordMismatch);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_weak_password_rejected() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = auth_state();
        let token = issue_reset_token(state.keys(), "alice@example.com", 900)?;
        let outcome = validate_and_consume(&pool, &state, &token, "short", "short").await?;
        assert_eq!(outcome, ResetOutcome::WeakPassword);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_expired_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let state = auth_state();
        // Past the decoder's default leeway.
        let token = issue_reset_token(state.keys(), "alice@example.com", -120)?;
        let outcome =
            validate_and_consume(&pool, &state, &token, "longenough", "longenough").await?;
        assert_eq!(outcome, ResetOutcome::Expired);
        Ok(())
    }
}
