//! Signup endpoint: create a principal and sign the device in.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::email::welcome_notice;

use super::captcha::{captcha_cookie, read_captcha_state, CaptchaCheck, CaptchaState};
use super::session::issue_session;
use super::state::AuthState;
use super::storage::{insert_principal, SignupOutcome};
use super::types::{SessionResponse, SignupRequest};
use super::utils::{
    normalize_email, normalize_login, request_user_agent, valid_email, valid_login, valid_password,
};

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = SessionResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 403, description = "Captcha required", body = String),
        (status = 409, description = "User already exists", body = String)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let login = normalize_login(&request.login);
    if !valid_login(&login) {
        return (StatusCode::BAD_REQUEST, "Invalid login".to_string()).into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    if !valid_password(&request.password) {
        return (
            StatusCode::BAD_REQUEST,
            "Password does not meet policy".to_string(),
        )
            .into_response();
    }

    let mut captcha = read_captcha_state(&headers, auth_state.keys());
    match captcha
        .require_if_needed(auth_state.captcha(), request.captcha_token.as_deref())
        .await
    {
        Ok(CaptchaCheck::Passed) => {}
        Ok(CaptchaCheck::CaptchaRequired) => {
            return captcha_demand(&auth_state, captcha).into_response();
        }
        Err(err) => {
            error!("Captcha verification failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    }

    let password_hash = match bcrypt::hash(&request.password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    let principal = match insert_principal(&pool, &login, &email, &password_hash).await {
        Ok(SignupOutcome::Created(principal)) => principal,
        Ok(SignupOutcome::Conflict) => {
            // A taken login/email burns an attempt like a wrong password does.
            captcha.record_failed_attempt();
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = captcha_cookie(&auth_state, captcha) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            return (
                StatusCode::CONFLICT,
                response_headers,
                "User already exists".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to insert principal: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    let user_agent = request_user_agent(&headers);
    let issued = match issue_session(
        &pool,
        &auth_state,
        &principal,
        &user_agent,
        request.remember_me,
    )
    .await
    {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to issue session: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Signup failed".to_string())
                .into_response();
        }
    };

    if let Err(err) = auth_state
        .mailer()
        .send(&welcome_notice(&principal.login, &principal.email))
    {
        error!("Failed to send welcome notice: {err}");
    }

    captcha.record_success();
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, issued.cookie);
    if let Ok(cookie) = captcha_cookie(&auth_state, captcha) {
        response_headers.append(SET_COOKIE, cookie);
    }

    let response = SessionResponse {
        permanent_id: principal.permanent_id.to_string(),
        login: principal.login,
        email: principal.email,
    };
    (StatusCode::CREATED, response_headers, Json(response)).into_response()
}

/// 403 with the current gate state so the frontend renders the widget.
pub(super) fn captcha_demand(
    auth_state: &AuthState,
    captcha: CaptchaState,
) -> (StatusCode, HeaderMap, String) {
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = captcha_cookie(auth_state, captcha) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::FORBIDDEN,
        response_headers,
        "Captcha required".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::captcha::NoopCaptchaVerifier;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::tokens::TokenKeys;
    use anyhow::Result;
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

    #[tokio::test]
    async fn signup_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signup_invalid_login() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                login: "x".to_string(),
                email: "alice@example.com".to_string(),
                password: "longenough".to_string(),
                remember_me: false,
                captcha_token: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signup_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                login: "alice".to_string(),
                email: "not-an-email".to_string(),
                password: "longenough".to_string(),
                remember_me: false,
                captcha_token: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signup_weak_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                login: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "short".to_string(),
                remember_me: false,
                captcha_token: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
