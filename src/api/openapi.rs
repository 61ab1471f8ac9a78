//! OpenAPI document for the auth API.

use utoipa::OpenApi;

use crate::api::handlers::auth::types::{
    ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SessionResponse, SignInRedirect,
    SignupRequest,
};
use crate::api::handlers::health::Health;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health::health,
        crate::api::handlers::auth::signup::signup,
        crate::api::handlers::auth::login::login,
        crate::api::handlers::auth::session::session,
        crate::api::handlers::auth::session::logout,
        crate::api::handlers::auth::reset::forgot_password,
        crate::api::handlers::auth::reset::reset_password,
    ),
    components(schemas(
        Health,
        SignupRequest,
        LoginRequest,
        SessionResponse,
        SignInRedirect,
        ForgotPasswordRequest,
        ResetPasswordRequest,
    )),
    tags(
        (name = "auth", description = "Signup, login, sessions and password reset"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::openapi;

    #[test]
    fn openapi_lists_auth_routes() {
        let spec = openapi();
        let paths = &spec.paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/v1/auth/signup"));
        assert!(paths.contains_key("/v1/auth/login"));
        assert!(paths.contains_key("/v1/auth/session"));
        assert!(paths.contains_key("/v1/auth/logout"));
        assert!(paths.contains_key("/v1/auth/password/forgot"));
        assert!(paths.contains_key("/v1/auth/password/reset"));
    }
}
