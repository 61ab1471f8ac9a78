//! Session issuance, the session cookie, and the session/logout endpoints.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::email::new_device_notice;

use super::guard::{self, GuardOutcome};
use super::principal::Principal;
use super::revocation::revoke;
use super::state::{AuthConfig, AuthState};
use super::storage::{
    cancel_refresh_token, cancel_temporary_session, insert_refresh_token,
    insert_temporary_session, lookup_active_session, unique_device_agents,
};
use super::tokens::issue_refresh_token;
use super::types::{SessionResponse, SignInRedirect};
use super::utils::{cookie_value, request_user_agent};

pub(crate) const SESSION_COOKIE_NAME: &str = "gardisto_session";

/// Fresh credential pair minted for one login on one device.
pub(super) struct IssuedSession {
    pub(super) temporary_id: Uuid,
    pub(super) refresh_token: String,
    pub(super) cookie: HeaderValue,
}

/// Mint a bound (temporary session, refresh token) pair for this device.
///
/// The known-device set is read BEFORE the new rows are written, otherwise
/// every login would see itself as a known device. The cancel-old/insert-new
/// steps run in one transaction: a reader never observes the new credential
/// alongside a still-active old one, or a half-written pair.
pub(super) async fn issue_session(
    pool: &PgPool,
    state: &AuthState,
    principal: &Principal,
    user_agent: &str,
    remember_me: bool,
) -> Result<IssuedSession> {
    let known_agents = unique_device_agents(pool, principal.permanent_id).await?;

    let ttl_seconds = state.config().credential_ttl_seconds(remember_me);
    let refresh_token = issue_refresh_token(state.keys(), principal.permanent_id, ttl_seconds)?;
    let temporary_id = Uuid::new_v4();

    let mut tx = pool.begin().await.context("begin session transaction")?;

    cancel_temporary_session(&mut tx, principal.permanent_id, user_agent).await?;
    cancel_refresh_token(&mut tx, principal.permanent_id, user_agent).await?;
    insert_temporary_session(&mut tx, principal.permanent_id, temporary_id, user_agent).await?;
    insert_refresh_token(&mut tx, principal.permanent_id, &refresh_token, user_agent).await?;

    tx.commit().await.context("commit session transaction")?;

    if is_new_device(&known_agents, user_agent) {
        info!(login = %principal.login, user_agent, "first login from a new device");
        let notice = new_device_notice(&principal.login, &principal.email, user_agent);
        if let Err(err) = state.mailer().send(&notice) {
            // The credentials are already committed; a lost notice must not
            // fail the login.
            error!("Failed to send new-device notice: {err}");
        }
    }

    let cookie = session_cookie(state, temporary_id, remember_me)
        .context("failed to build session cookie")?;

    let issued = IssuedSession {
        temporary_id,
        refresh_token,
        cookie,
    };
    info!(temporary_id = %issued.temporary_id, login = %principal.login, "device credentials issued");

    Ok(issued)
}

pub(super) fn is_new_device(known_agents: &HashSet<String>, user_agent: &str) -> bool {
    !known_agents.contains(user_agent)
}

/// Build the `HttpOnly` session cookie; lifetime mirrors the remember-me
/// policy applied to the refresh token.
pub(super) fn session_cookie(
    state: &AuthState,
    temporary_id: Uuid,
    remember_me: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = state.config().credential_ttl_seconds(remember_me);
    let secure = state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={temporary_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=-1");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the `temporary_id` out of the session cookie, if any.
pub(super) fn extract_session_id(headers: &HeaderMap) -> Option<Uuid> {
    let value = cookie_value(headers, SESSION_COOKIE_NAME)?;
    Uuid::parse_str(value.trim()).ok()
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 401, description = "No usable session; sign in again", body = SignInRedirect)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let temporary_id = extract_session_id(&headers);
    let user_agent = request_user_agent(&headers);

    match guard::check(&pool, &auth_state, temporary_id, &user_agent).await {
        Ok(GuardOutcome::Authenticated(principal)) => {
            let response = SessionResponse {
                permanent_id: principal.permanent_id.to_string(),
                login: principal.login,
                email: principal.email,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(GuardOutcome::Denied(reason)) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            let body = SignInRedirect {
                reason: reason.as_str().to_string(),
                redirect_to: auth_state.config().sign_in_url(),
            };
            (StatusCode::UNAUTHORIZED, response_headers, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to evaluate session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked and cookie cleared"),
        (status = 500, description = "Revocation failed; credentials unchanged")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(temporary_id) = extract_session_id(&headers) {
        let row = match lookup_active_session(&pool, temporary_id).await {
            Ok(row) => row,
            Err(err) => {
                error!("Failed to lookup session for logout: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        // Revoke the whole device binding, not just the session row.
        if let Some(row) = row {
            if let Err(err) = revoke(&pool, row.permanent_id, &row.user_agent).await {
                error!("Failed to revoke credentials on logout: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}
