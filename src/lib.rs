//! # Gardisto (credential and session lifecycle)
//!
//! `gardisto` authenticates end users of a single web application. It issues
//! and validates short-lived session identifiers, rotates longer-lived refresh
//! tokens, issues single-use password-reset tokens, and throttles brute-force
//! sign-in attempts with an escalating CAPTCHA gate.
//!
//! ## Credential Ledger
//!
//! Sessions and refresh tokens live in an append-mostly Postgres ledger: a new
//! row is inserted per login event and existing rows are only ever flipped
//! `cancelled = false -> true`. "Active" always means the latest non-cancelled
//! row for a `(permanent_id, user_agent)` device binding.
//!
//! ## Device Binding & Cascade Revocation
//!
//! Device identity is approximated by the User-Agent string. A request whose
//! User-Agent does not match the one bound to the active refresh token is
//! treated as suspicious: both halves of the device's credential pair are
//! cancelled in one transaction and the account owner is notified by email.
//! Partial revocation is never observable.

pub mod api;
pub mod cli;
