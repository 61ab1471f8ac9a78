//! The permanent user identity record.

use uuid::Uuid;

/// Durable identity created once at signup completion. `permanent_id` is
/// immutable and is the foreign key for sessions, refresh tokens and resets.
#[derive(Clone, Debug)]
pub struct Principal {
    pub permanent_id: Uuid,
    pub login: String,
    pub email: String,
    pub password_hash: String,
}

/// Outcome of checking a candidate password against the stored bcrypt hash.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum PasswordCheck {
    Valid,
    Mismatch,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::{PasswordCheck, Principal};
    use uuid::Uuid;

    #[test]
    fn password_check_debug_names() {
        assert_eq!(format!("{:?}", PasswordCheck::Valid), "Valid");
        assert_eq!(format!("{:?}", PasswordCheck::Mismatch), "Mismatch");
        assert_eq!(format!("{:?}", PasswordCheck::NotFound), "NotFound");
    }

    #[test]
    fn principal_holds_values() {
        let principal = Principal {
            permanent_id: Uuid::nil(),
            login: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$2b$12$hash".to_string(),
        };
        assert_eq!(principal.permanent_id, Uuid::nil());
        assert_eq!(principal.login, "alice");
        assert_eq!(principal.email, "alice@example.com");
    }
}
