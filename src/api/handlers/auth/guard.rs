//! Per-request gate over the credential ledger.
//!
//! States: `NoCookie -> SessionLookup -> {SessionCancelled, SessionActive}`;
//! from `SessionActive`: `RefreshTokenLookup -> {RefreshMissingOrCancelled,
//! DeviceMismatch, Authenticated}`. Nothing persists in-process between
//! requests; all state lives in the ledger and the cookies.
//!
//! A cascade failure denies the request. The guard never fails open.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::api::email::suspicious_login_notice;

use super::principal::Principal;
use super::revocation::{revoke, revoke_session_only};
use super::state::AuthState;
use super::storage::{
    find_principal_by_id, lookup_active_refresh_token, lookup_active_session, RefreshRow,
    SessionRow,
};
use super::tokens::decode_refresh_token;

/// Why a request was denied; each maps to a deny-with-redirect response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DenyReason {
    NoSession,
    SessionCancelled,
    RefreshRevoked,
    DeviceMismatch,
}

impl DenyReason {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::SessionCancelled => "session_cancelled",
            Self::RefreshRevoked => "refresh_revoked",
            Self::DeviceMismatch => "device_mismatch",
        }
    }
}

pub(super) enum GuardOutcome {
    Authenticated(Principal),
    Denied(DenyReason),
}

/// What the ledger rows say about this request, before any side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GuardDecision {
    NoSession,
    SessionCancelled,
    RefreshRevoked,
    DeviceMismatch,
    Authenticated,
}

/// Pure decision over the fetched rows. `refresh_usable` folds in the token's
/// own expiry claims: an expired refresh token is treated exactly like a
/// cancelled one.
fn evaluate(
    session: Option<&SessionRow>,
    refresh: Option<&RefreshRow>,
    refresh_usable: bool,
    current_agent: &str,
) -> GuardDecision {
    let Some(session) = session else {
        return GuardDecision::NoSession;
    };
    if session.cancelled {
        return GuardDecision::SessionCancelled;
    }

    let Some(refresh) = refresh else {
        return GuardDecision::RefreshRevoked;
    };
    if refresh.cancelled || !refresh_usable {
        return GuardDecision::RefreshRevoked;
    }

    if session.user_agent != current_agent {
        return GuardDecision::DeviceMismatch;
    }

    GuardDecision::Authenticated
}

/// Validate the inbound session and enforce the device binding.
///
/// The refresh token is looked up under the STORED user agent: that is the
/// device the credentials were bound to, and the binding that gets revoked
/// when the request's agent does not match it.
pub(super) async fn check(
    pool: &PgPool,
    state: &AuthState,
    temporary_id: Option<Uuid>,
    current_agent: &str,
) -> Result<GuardOutcome> {
    let Some(temporary_id) = temporary_id else {
        return Ok(GuardOutcome::Denied(DenyReason::NoSession));
    };

    let session = lookup_active_session(pool, temporary_id).await?;

    let refresh = match &session {
        Some(row) if !row.cancelled => {
            lookup_active_refresh_token(pool, row.permanent_id, &row.user_agent).await?
        }
        _ => None,
    };

    let refresh_usable = refresh
        .as_ref()
        .is_some_and(|row| decode_refresh_token(state.keys(), &row.token).is_valid());

    match evaluate(session.as_ref(), refresh.as_ref(), refresh_usable, current_agent) {
        GuardDecision::NoSession => Ok(GuardOutcome::Denied(DenyReason::NoSession)),
        GuardDecision::SessionCancelled => {
            // Keep the session side tidy; the refresh token is left untouched.
            if let Some(row) = &session {
                revoke_session_only(pool, row.permanent_id, &row.user_agent).await?;
            }
            Ok(GuardOutcome::Denied(DenyReason::SessionCancelled))
        }
        GuardDecision::RefreshRevoked => {
            // No usable refresh token means this device is fully logged out.
            if let Some(row) = &session {
                revoke(pool, row.permanent_id, &row.user_agent).await?;
            }
            Ok(GuardOutcome::Denied(DenyReason::RefreshRevoked))
        }
        GuardDecision::DeviceMismatch => {
            let Some(row) = &session else {
                return Ok(GuardOutcome::Denied(DenyReason::NoSession));
            };
            warn!(
                stored_agent = %row.user_agent,
                current_agent,
                "device mismatch on active session"
            );
            revoke(pool, row.permanent_id, &row.user_agent).await?;
            notify_principal(pool, state, row.permanent_id, current_agent).await;
            Ok(GuardOutcome::Denied(DenyReason::DeviceMismatch))
        }
        GuardDecision::Authenticated => {
            let Some(row) = &session else {
                return Ok(GuardOutcome::Denied(DenyReason::NoSession));
            };
            match find_principal_by_id(pool, row.permanent_id).await? {
                Some(principal) => Ok(GuardOutcome::Authenticated(principal)),
                None => Ok(GuardOutcome::Denied(DenyReason::NoSession)),
            }
        }
    }
}

/// Mail the account owner the offending user agent. The credentials are
/// already revoked at this point; a lost notice only loses visibility.
async fn notify_principal(
    pool: &PgPool,
    state: &AuthState,
    permanent_id: Uuid,
    offending_agent: &str,
) {
    match find_principal_by_id(pool, permanent_id).await {
        Ok(Some(principal)) => {
            let notice = suspicious_login_notice(&principal.email, offending_agent);
            if let Err(err) = state.mailer().send(&notice) {
                error!("Failed to send suspicious-login notice: {err}");
            }
        }
        Ok(None) => {}
        Err(err) => error!("Failed to resolve principal for notice: {err}"),
    }
}
