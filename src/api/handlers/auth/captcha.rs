//! Escalating CAPTCHA gate for login and signup attempts.
//!
//! The attempt counter lives entirely client-side: it is carried as signed
//! HS256 claims in the `gardisto_captcha` cookie, so no server-side storage or
//! locking is involved. Tampered or expired cookies decode to the initial
//! state, which only means the gate starts counting again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::state::AuthState;
use super::tokens::{decode_claims, encode_claims, TokenKeys, TokenStatus};
use super::utils::cookie_value;

pub(crate) const CAPTCHA_COOKIE_NAME: &str = "gardisto_captcha";

/// Attempts granted before the widget is demanded.
const INITIAL_ATTEMPTS: i32 = 3;
/// Once the counter falls to this, `show_captcha` latches on.
const SHOW_THRESHOLD: i32 = 1;

/// Per-browser attempt counter and escalation flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CaptchaState {
    counter: i32,
    show_captcha: bool,
}

impl Default for CaptchaState {
    fn default() -> Self {
        Self {
            counter: INITIAL_ATTEMPTS,
            show_captcha: false,
        }
    }
}

impl CaptchaState {
    /// Burn one attempt; latches `show_captcha` once the counter is low.
    /// The flag never reverts on its own, only [`CaptchaState::record_success`]
    /// clears it.
    pub(crate) fn record_failed_attempt(&mut self) {
        self.counter = self.counter.saturating_sub(1);
        if self.counter <= SHOW_THRESHOLD {
            self.show_captcha = true;
        }
    }

    pub(crate) fn record_success(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn show_captcha(&self) -> bool {
        self.show_captcha
    }

    #[cfg(test)]
    pub(crate) fn counter(&self) -> i32 {
        self.counter
    }

    /// Demand a verified CAPTCHA token once the gate has escalated. A missing
    /// token or a not-human verdict is `CaptchaRequired`, distinct from a
    /// credential error, so the caller can render the widget instead of a
    /// generic failure.
    pub(crate) async fn require_if_needed(
        &self,
        verifier: &dyn CaptchaVerifier,
        provided_token: Option<&str>,
    ) -> Result<CaptchaCheck> {
        if !self.show_captcha {
            return Ok(CaptchaCheck::Passed);
        }

        let Some(token) = provided_token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(CaptchaCheck::CaptchaRequired);
        };

        if verifier.verify(token).await? {
            Ok(CaptchaCheck::Passed)
        } else {
            Ok(CaptchaCheck::CaptchaRequired)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CaptchaCheck {
    Passed,
    CaptchaRequired,
}

/// External "is this a human" verdict. Provider HTTP mechanics stay behind
/// this trait; the gate only consumes the boolean.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<bool>;
}

/// Verifier that accepts everyone; used when no provider is configured.
#[derive(Clone, Debug)]
pub struct NoopCaptchaVerifier;

#[async_trait]
impl CaptchaVerifier for NoopCaptchaVerifier {
    async fn verify(&self, _token: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Verifier that posts the widget token to the provider's verify endpoint.
#[derive(Clone, Debug)]
pub struct HttpCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpCaptchaVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(verify_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::api::APP_USER_AGENT)
            .build()
            .context("failed to build captcha client")?;
        Ok(Self { client, verify_url })
    }
}

#[async_trait]
impl CaptchaVerifier for HttpCaptchaVerifier {
    async fn verify(&self, token: &str) -> Result<bool> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "response": token }))
            .send()
            .await
            .context("captcha verify request failed")?;

        if !response.status().is_success() {
            error!("Captcha verify returned {}", response.status());
            return Ok(false);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .context("captcha verify returned invalid payload")?;
        Ok(payload
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CaptchaClaims {
    cnt: i32,
    show: bool,
    iat: i64,
    exp: i64,
}

/// Serialize the gate state into a signed cookie scoped to the auth flow.
pub(super) fn captcha_cookie(
    state: &AuthState,
    captcha: CaptchaState,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let window = state.config().captcha_window_seconds();
    let now = Utc::now().timestamp();
    let claims = CaptchaClaims {
        cnt: captcha.counter,
        show: captcha.show_captcha,
        iat: now,
        exp: now + window,
    };

    // A signing failure falls back to an empty value, which readers treat as
    // the initial state.
    let token = encode_claims(state.keys(), &claims).unwrap_or_default();
    let secure = state.config().session_cookie_secure();
    let mut cookie =
        format!("{CAPTCHA_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={window}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read the gate state back from the request; anything unreadable is the
/// initial state.
pub(super) fn read_captcha_state(headers: &HeaderMap, keys: &TokenKeys) -> CaptchaState {
    let Some(token) = cookie_value(headers, CAPTCHA_COOKIE_NAME) else {
        return CaptchaState::default();
    };
    match decode_claims::<CaptchaClaims>(keys, &token) {
        TokenStatus::Valid(claims) => CaptchaState {
            counter: claims.cnt,
            show_captcha: claims.show,
        },
        TokenStatus::Expired | TokenStatus::Invalid => CaptchaState::default(),
    }
}
