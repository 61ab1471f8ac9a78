//! Email delivery abstraction and notice builders.
//!
//! The credential flows only produce plain [`EmailMessage`] values: new-device
//! notices, suspicious-login notices, password-reset links and welcome mail.
//! Delivery (SMTP, provider API, queue) lives behind the [`EmailSender`] trait;
//! the default [`LogEmailSender`] logs and returns `Ok(())` for local dev.

use anyhow::Result;
use serde_json::json;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body_json: String,
}

/// Email delivery abstraction used by the auth flows.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            payload = %message.body_json,
            "email send stub"
        );
        Ok(())
    }
}

/// Notice for a login from a User-Agent never seen for this account.
pub(crate) fn new_device_notice(login: &str, email: &str, user_agent: &str) -> EmailMessage {
    EmailMessage {
        to_email: email.to_string(),
        subject: "New sign-in on an unrecognized device".to_string(),
        body_json: json!({
            "login": login,
            "user_agent": user_agent,
        })
        .to_string(),
    }
}

/// Notice for a request whose User-Agent did not match the device binding.
/// Sent after the device's credentials have been revoked.
pub(crate) fn suspicious_login_notice(email: &str, user_agent: &str) -> EmailMessage {
    EmailMessage {
        to_email: email.to_string(),
        subject: "Suspicious sign-in attempt blocked".to_string(),
        body_json: json!({
            "user_agent": user_agent,
        })
        .to_string(),
    }
}

/// Password-reset link mail; the link embeds the single-use token.
pub(crate) fn password_reset_notice(email: &str, reset_url: &str) -> EmailMessage {
    EmailMessage {
        to_email: email.to_string(),
        subject: "Password reset requested".to_string(),
        body_json: json!({
            "reset_url": reset_url,
        })
        .to_string(),
    }
}

pub(crate) fn welcome_notice(login: &str, email: &str) -> EmailMessage {
    EmailMessage {
        to_email: email.to_string(),
        subject: "Welcome".to_string(),
        body_json: json!({
            "login": login,
        })
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn log_email_sender_accepts_messages() -> Result<()> {
        let sender = LogEmailSender;
        sender.send(&welcome_notice("alice", "alice@example.com"))
    }

    #[test]
    fn new_device_notice_carries_agent() -> Result<()> {
        let message = new_device_notice("alice", "alice@example.com", "Mozilla/5.0");
        assert_eq!(message.to_email, "alice@example.com");

        let payload: serde_json::Value = serde_json::from_str(&message.body_json)?;
        let agent = payload
            .get("user_agent")
            .and_then(serde_json::Value::as_str)
            .context("missing user_agent")?;
        assert_eq!(agent, "Mozilla/5.0");
        Ok(())
    }

    #[test]
    fn suspicious_login_notice_carries_offending_agent() -> Result<()> {
        let message = suspicious_login_notice("bob@example.com", "curl/8.0");
        let payload: serde_json::Value = serde_json::from_str(&message.body_json)?;
        assert_eq!(
            payload.get("user_agent").and_then(serde_json::Value::as_str),
            Some("curl/8.0")
        );
        Ok(())
    }

    #[test]
    fn password_reset_notice_embeds_link() -> Result<()> {
        let message = password_reset_notice("carol@example.com", "https://app/reset#token=t");
        let payload: serde_json::Value = serde_json::from_str(&message.body_json)?;
        assert_eq!(
            payload.get("reset_url").and_then(serde_json::Value::as_str),
            Some("https://app/reset#token=t")
        );
        Ok(())
    }
}
