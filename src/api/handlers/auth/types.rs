//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub login: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    pub captcha_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    /// Login name or email address.
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    pub captcha_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub permanent_id: String,
    pub login: String,
    pub email: String,
}

/// Body of every deny-with-redirect response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInRedirect {
    pub reason: String,
    pub redirect_to: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}
