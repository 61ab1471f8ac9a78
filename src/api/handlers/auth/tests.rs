//! Flow-level tests that exercise the handlers end to end, up to the points
//! that do not require a live database.

use super::captcha::{captcha_cookie, CaptchaState, NoopCaptchaVerifier};
use super::login::login;
use super::session::{logout, session};
use super::state::{AuthConfig, AuthState};
use super::tokens::TokenKeys;
use super::types::LoginRequest;
use crate::api::email::LogEmailSender;
use anyhow::{Context, Result};
use axum::extract::Extension;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

fn auth_state() -> Arc<AuthState> {
    Arc::new(AuthState::new(
        AuthConfig::new("https://app.example.com".to_string()),
        TokenKeys::from_secret(&SecretString::from("sekreta".to_string())),
        Arc::new(NoopCaptchaVerifier),
        Arc::new(LogEmailSender),
    ))
}

fn lazy_pool() -> Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost/postgres")
        .context("failed to build lazy pool")
}

/// An escalated gate must demand the widget before credentials are even
/// looked at.
#[tokio::test]
async fn escalated_captcha_blocks_login_without_token() -> Result<()> {
    let state = auth_state();

    let mut captcha = CaptchaState::default();
    captcha.record_failed_attempt();
    captcha.record_failed_attempt();
    assert!(captcha.show_captcha());

    let cookie = captcha_cookie(&state, captcha)?;
    let pair = cookie
        .to_str()?
        .split(';')
        .next()
        .context("empty cookie")?
        .to_string();

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&pair)?);

    let response = login(
        headers,
        Extension(lazy_pool()?),
        Extension(state),
        Some(Json(LoginRequest {
            login: "alice".to_string(),
            password: "whatever1".to_string(),
            remember_me: false,
            captcha_token: None,
        })),
    )
    .await
    .into_response();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // The demand re-issues the gate cookie so the widget state survives.
    assert!(response.headers().contains_key(SET_COOKIE));
    Ok(())
}

/// A request without a session cookie is denied with a sign-in redirect.
#[tokio::test]
async fn session_without_cookie_is_denied() -> Result<()> {
    let response = session(
        HeaderMap::new(),
        Extension(lazy_pool()?),
        Extension(auth_state()),
    )
    .await
    .into_response();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = axum::body::to_bytes(response.into_body(), 4096).await?;
    let payload: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(
        payload.get("reason").and_then(serde_json::Value::as_str),
        Some("no_session")
    );
    assert_eq!(
        payload
            .get("redirect_to")
            .and_then(serde_json::Value::as_str),
        Some("https://app.example.com/sign-in")
    );
    Ok(())
}

/// Logout is idempotent: no cookie still clears the cookie and succeeds.
#[tokio::test]
async fn logout_without_cookie_clears_and_succeeds() -> Result<()> {
    let response = logout(
        HeaderMap::new(),
        Extension(lazy_pool()?),
        Extension(auth_state()),
    )
    .await
    .into_response();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("missing cleared cookie")?;
    assert!(cookie.to_str()?.contains("Max-Age=-1"));
    Ok(())
}
