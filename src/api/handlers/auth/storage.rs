//! Database operations for the credential ledger.
//!
//! Sessions and refresh tokens are append-mostly: logins insert new rows and
//! cancellation only ever flips `cancelled` to true. "Active" is the latest
//! insert for a key that has not been cancelled. Multi-step mutations
//! (cancel-old + insert-new, two-sided revocation, password reset consumption)
//! take a caller-supplied transaction; this module never opens its own
//! transaction for them, so atomicity is decided at the use-site.

use anyhow::{ensure, Context, Result};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::Instrument;
use uuid::Uuid;

use super::principal::{PasswordCheck, Principal};
use super::utils::is_unique_violation;

/// Outcome when attempting to create a new principal.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Principal),
    Conflict,
}

/// Latest ledger row for a session cookie's `temporary_id`.
pub(super) struct SessionRow {
    pub(super) permanent_id: Uuid,
    pub(super) user_agent: String,
    pub(super) cancelled: bool,
}

/// Latest ledger row for a `(permanent_id, user_agent)` refresh binding.
pub(super) struct RefreshRow {
    pub(super) token: String,
    pub(super) cancelled: bool,
}

fn principal_from_row(row: &sqlx::postgres::PgRow) -> Principal {
    Principal {
        permanent_id: row.get("permanent_id"),
        login: row.get("login"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
    }
}

pub(super) async fn find_principal_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<Principal>> {
    let query = "SELECT permanent_id, login, email, password_hash FROM principal WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by email")?;

    Ok(row.map(|row| principal_from_row(&row)))
}

pub(super) async fn find_principal_by_login(
    pool: &PgPool,
    login: &str,
) -> Result<Option<Principal>> {
    let query = "SELECT permanent_id, login, email, password_hash FROM principal WHERE login = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by login")?;

    Ok(row.map(|row| principal_from_row(&row)))
}

pub(super) async fn find_principal_by_id(
    pool: &PgPool,
    permanent_id: Uuid,
) -> Result<Option<Principal>> {
    let query =
        "SELECT permanent_id, login, email, password_hash FROM principal WHERE permanent_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(permanent_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by id")?;

    Ok(row.map(|row| principal_from_row(&row)))
}

/// Check a candidate password against the stored bcrypt hash.
pub(super) async fn verify_password(
    pool: &PgPool,
    permanent_id: Uuid,
    candidate: &str,
) -> Result<PasswordCheck> {
    let query = "SELECT password_hash FROM principal WHERE permanent_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(permanent_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password hash")?;

    let Some(row) = row else {
        return Ok(PasswordCheck::NotFound);
    };

    let hash: String = row.get("password_hash");
    if bcrypt::verify(candidate, &hash).context("failed to verify password hash")? {
        Ok(PasswordCheck::Valid)
    } else {
        Ok(PasswordCheck::Mismatch)
    }
}

/// Create the permanent identity row; `Conflict` when login or email is taken.
pub(super) async fn insert_principal(
    pool: &PgPool,
    login: &str,
    email: &str,
    password_hash: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO principal (login, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING permanent_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(login)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(Principal {
            permanent_id: row.get("permanent_id"),
            login: login.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        })),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert principal"),
    }
}

pub(super) async fn insert_temporary_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    permanent_id: Uuid,
    temporary_id: Uuid,
    user_agent: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO temporary_session (temporary_id, permanent_id, user_agent)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(temporary_id)
        .bind(permanent_id)
        .bind(user_agent)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert temporary session")?;
    Ok(())
}

pub(super) async fn insert_refresh_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    permanent_id: Uuid,
    token: &str,
    user_agent: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_token (permanent_id, token, user_agent)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(permanent_id)
        .bind(token)
        .bind(user_agent)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// Flip `cancelled` on every still-active session row for the device binding.
/// Already-cancelled rows are untouched, so the call is idempotent.
pub(super) async fn cancel_temporary_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    permanent_id: Uuid,
    user_agent: &str,
) -> Result<()> {
    let query = r"
        UPDATE temporary_session
        SET cancelled = TRUE
        WHERE permanent_id = $1
          AND user_agent = $2
          AND cancelled = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(permanent_id)
        .bind(user_agent)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to cancel temporary session")?;
    Ok(())
}

pub(super) async fn cancel_refresh_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    permanent_id: Uuid,
    user_agent: &str,
) -> Result<()> {
    let query = r"
        UPDATE refresh_token
        SET cancelled = TRUE
        WHERE permanent_id = $1
          AND user_agent = $2
          AND cancelled = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(permanent_id)
        .bind(user_agent)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to cancel refresh token")?;
    Ok(())
}

/// Latest ledger row for this `temporary_id`; the ledger is append-only, so
/// the most recent insert wins.
pub(super) async fn lookup_active_session(
    pool: &PgPool,
    temporary_id: Uuid,
) -> Result<Option<SessionRow>> {
    let query = r"
        SELECT permanent_id, user_agent, cancelled
        FROM temporary_session
        WHERE temporary_id = $1
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(temporary_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionRow {
        permanent_id: row.get("permanent_id"),
        user_agent: row.get("user_agent"),
        cancelled: row.get("cancelled"),
    }))
}

pub(super) async fn lookup_active_refresh_token(
    pool: &PgPool,
    permanent_id: Uuid,
    user_agent: &str,
) -> Result<Option<RefreshRow>> {
    let query = r"
        SELECT token, cancelled
        FROM refresh_token
        WHERE permanent_id = $1
          AND user_agent = $2
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(permanent_id)
        .bind(user_agent)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup refresh token")?;

    Ok(row.map(|row| RefreshRow {
        token: row.get("token"),
        cancelled: row.get("cancelled"),
    }))
}

/// Every User-Agent that ever held a refresh token for this principal. Used to
/// detect a first login from a new device, so it must be read BEFORE the new
/// row is written.
pub(super) async fn unique_device_agents(
    pool: &PgPool,
    permanent_id: Uuid,
) -> Result<HashSet<String>> {
    let query = "SELECT DISTINCT user_agent FROM refresh_token WHERE permanent_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(permanent_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list device agents")?;

    Ok(rows.iter().map(|row| row.get("user_agent")).collect())
}

pub(super) async fn insert_reset_token(
    pool: &PgPool,
    token_hash: &[u8],
    email: &str,
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO reset_token (token_hash, email, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(email)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert reset token")?;
    Ok(())
}

/// Consume the reset token: returns false when the row was already cancelled,
/// expired or never existed, so concurrent consumers cannot both win.
pub(super) async fn cancel_reset_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<bool> {
    let query = r"
        UPDATE reset_token
        SET cancelled = TRUE
        WHERE token_hash = $1
          AND cancelled = FALSE
          AND expires_at > NOW()
        RETURNING email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to cancel reset token")?;

    Ok(row.is_some())
}

/// Missing rows count as unusable.
pub(super) async fn is_reset_token_cancelled_or_expired(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<bool> {
    let query = r"
        SELECT (cancelled OR expires_at <= NOW()) AS unusable
        FROM reset_token
        WHERE token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check reset token")?;

    Ok(row.map_or(true, |row| row.get("unusable")))
}

pub(super) async fn update_password_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    password_hash: &str,
) -> Result<()> {
    let query = "UPDATE principal SET password_hash = $2 WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;

    ensure!(
        result.rows_affected() == 1,
        "no principal found for password update"
    );
    Ok(())
}
