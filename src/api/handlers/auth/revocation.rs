//! Cascade revocation of a device's credential pair.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::storage::{cancel_refresh_token, cancel_temporary_session};

/// Cancel both the temporary session and the refresh token bound to
/// `(permanent_id, user_agent)` in one transaction. A failure on either side
/// rolls back the whole pair, so partial revocation is never observable.
///
/// Idempotent: revoking an already-cancelled pair is a no-op success, so
/// logout and the request guard can call this defensively.
pub(crate) async fn revoke(pool: &PgPool, permanent_id: Uuid, user_agent: &str) -> Result<()> {
    let mut tx = pool.begin().await.context("begin revoke transaction")?;

    cancel_temporary_session(&mut tx, permanent_id, user_agent).await?;
    cancel_refresh_token(&mut tx, permanent_id, user_agent).await?;

    tx.commit().await.context("commit revoke transaction")?;
    Ok(())
}

/// Cancel only the temporary session for the binding, leaving the refresh
/// token alone. Used when the session row itself is already cancelled and the
/// cascade is limited to keeping the session side tidy.
pub(crate) async fn revoke_session_only(
    pool: &PgPool,
    permanent_id: Uuid,
    user_agent: &str,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("begin session revoke transaction")?;

    cancel_temporary_session(&mut tx, permanent_id, user_agent).await?;

    tx.commit()
        .await
        .context("commit session revoke transaction")?;
    Ok(())
}
