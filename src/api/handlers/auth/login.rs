//! Login endpoint: verify credentials behind the CAPTCHA gate and sign the
//! device in.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use super::captcha::{captcha_cookie, read_captcha_state, CaptchaCheck, CaptchaState};
use super::principal::{PasswordCheck, Principal};
use super::session::issue_session;
use super::signup::captcha_demand;
use super::state::AuthState;
use super::storage::{find_principal_by_email, find_principal_by_login, verify_password};
use super::types::{LoginRequest, SessionResponse};
use super::utils::{normalize_email, normalize_login, request_user_agent, valid_email};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Captcha required", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.login.trim().is_empty() || request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing credentials".to_string()).into_response();
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
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    }

    let principal = match lookup_principal(&pool, &request.login).await {
        Ok(principal) => principal,
        Err(err) => {
            error!("Failed to lookup principal: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // Unknown account and wrong password both burn an attempt and answer the
    // same 401, so the response does not reveal which one happened.
    let Some(principal) = principal else {
        debug!("Login for unknown principal");
        return failed_attempt(&auth_state, captcha).into_response();
    };

    match verify_password(&pool, principal.permanent_id, &request.password).await {
        Ok(PasswordCheck::Valid) => {}
        Ok(PasswordCheck::Mismatch | PasswordCheck::NotFound) => {
            return failed_attempt(&auth_state, captcha).into_response();
        }
        Err(err) => {
            error!("Failed to verify password: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    }

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
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

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
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

/// The login field doubles as an email address.
async fn lookup_principal(pool: &PgPool, login_or_email: &str) -> anyhow::Result<Option<Principal>> {
    let email = normalize_email(login_or_email);
    if valid_email(&email) {
        return find_principal_by_email(pool, &email).await;
    }
    find_principal_by_login(pool, &normalize_login(login_or_email)).await
}

fn failed_attempt(
    auth_state: &AuthState,
    mut captcha: CaptchaState,
) -> (StatusCode, HeaderMap, String) {
    captcha.record_failed_attempt();
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = captcha_cookie(auth_state, captcha) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::UNAUTHORIZED,
        response_headers,
        "Invalid credentials".to_string(),
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
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
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
    async fn login_missing_credentials() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                login: "  ".to_string(),
                password: String::new(),
                remember_me: false,
                captcha_token: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn failed_attempt_sets_captcha_cookie() {
        let state = auth_state();
        let (status, headers, body) = failed_attempt(&state, CaptchaState::default());
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid credentials");
        assert!(headers.contains_key(SET_COOKIE));
    }
}
