//! Auth configuration and shared per-process state.
//!
//! One [`AuthState`] is constructed at startup and handed to handlers via an
//! axum `Extension`; nothing here is a global. Collaborators (CAPTCHA
//! verification, email delivery) are trait objects so tests stay hermetic.

use std::sync::Arc;

use crate::api::email::EmailSender;

use super::captcha::CaptchaVerifier;
use super::tokens::TokenKeys;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_CAPTCHA_WINDOW_SECONDS: i64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    remember_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    captcha_window_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            captcha_window_seconds: DEFAULT_CAPTCHA_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_window_seconds(mut self, seconds: i64) -> Self {
        self.captcha_window_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Credential lifetime for a login. `remember_me` selects the long expiry;
    /// otherwise the lifetime is capped at 24 hours no matter what the
    /// configured value says. The cap is policy, not a caller option.
    pub(super) fn credential_ttl_seconds(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_ttl_seconds
        } else {
            self.session_ttl_seconds.min(DEFAULT_SESSION_TTL_SECONDS)
        }
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(super) fn captcha_window_seconds(&self) -> i64 {
        self.captcha_window_seconds
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// Where denied requests are pointed to sign back in.
    pub(super) fn sign_in_url(&self) -> String {
        let base = self.frontend_base_url.trim_end_matches('/');
        format!("{base}/sign-in")
    }
}

pub struct AuthState {
    config: AuthConfig,
    keys: TokenKeys,
    captcha: Arc<dyn CaptchaVerifier>,
    mailer: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        keys: TokenKeys,
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            keys,
            captcha,
            mailer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    pub(super) fn captcha(&self) -> &dyn CaptchaVerifier {
        self.captcha.as_ref()
    }

    pub(super) fn mailer(&self) -> &dyn EmailSender {
        self.mailer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::captcha::NoopCaptchaVerifier;
    use secrecy::SecretString;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://app.example.com".to_string());

        assert_eq!(config.frontend_base_url(), "https://app.example.com");
        assert_eq!(
            config.credential_ttl_seconds(false),
            super::DEFAULT_SESSION_TTL_SECONDS
        );
        assert_eq!(
            config.credential_ttl_seconds(true),
            super::DEFAULT_REMEMBER_TTL_SECONDS
        );
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );

        let config = config
            .with_session_ttl_seconds(600)
            .with_remember_ttl_seconds(1200)
            .with_reset_token_ttl_seconds(60)
            .with_captcha_window_seconds(30);

        assert_eq!(config.credential_ttl_seconds(false), 600);
        assert_eq!(config.credential_ttl_seconds(true), 1200);
        assert_eq!(config.reset_token_ttl_seconds(), 60);
        assert_eq!(config.captcha_window_seconds(), 30);
    }

    #[test]
    fn credential_ttl_is_capped_without_remember_me() {
        // A longer configured lifetime must not leak into non-remembered logins.
        let config = AuthConfig::new("https://app.example.com".to_string())
            .with_session_ttl_seconds(30 * 24 * 60 * 60);

        assert_eq!(
            config.credential_ttl_seconds(false),
            super::DEFAULT_SESSION_TTL_SECONDS
        );
        assert_eq!(
            config.credential_ttl_seconds(true),
            super::DEFAULT_REMEMBER_TTL_SECONDS
        );
    }

    #[test]
    fn session_cookie_secure_follows_scheme() {
        assert!(AuthConfig::new("https://app.example.com".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string()).session_cookie_secure());
    }

    #[test]
    fn sign_in_url_trims_trailing_slash() {
        let config = AuthConfig::new("https://app.example.com/".to_string());
        assert_eq!(config.sign_in_url(), "https://app.example.com/sign-in");
    }

    #[test]
    fn auth_state_constructs_with_noop_collaborators() {
        let config = AuthConfig::new("https://app.example.com".to_string());
        let keys = TokenKeys::from_secret(&SecretString::from("sekreta".to_string()));
        let state = AuthState::new(
            config,
            keys,
            Arc::new(NoopCaptchaVerifier),
            Arc::new(LogEmailSender),
        );
        assert!(state.config().session_cookie_secure());
    }
}
