//! Small helpers for input validation, cookies and reset-token hashing.

use axum::http::{header::COOKIE, HeaderMap};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Normalize a login name the same way emails are normalized.
pub(super) fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// Login names are 3-32 chars of letters, digits, `_` or `-`.
pub(super) fn valid_login(login_normalized: &str) -> bool {
    Regex::new(r"^[a-z0-9_-]{3,32}$").is_ok_and(|regex| regex.is_match(login_normalized))
}

/// Password policy applied at signup and password reset.
pub(super) fn valid_password(password: &str) -> bool {
    let length = password.chars().count();
    (8..=128).contains(&length)
}

/// Hash a reset token so raw values never touch the database.
pub(super) fn hash_reset_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Device identity is approximated by the User-Agent string; requests without
/// one still get a stable binding key.
pub(super) fn request_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Extract a named cookie value from the request headers.
pub(super) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
