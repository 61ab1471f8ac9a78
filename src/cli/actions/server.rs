use crate::{api, api::handlers::auth::AuthConfig, cli::actions::Action};
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            token_secret,
            frontend_url,
            captcha_verify_url,
        } => {
            let auth_config = AuthConfig::new(frontend_url);

            api::new(port, dsn, auth_config, token_secret, captcha_verify_url).await?;
        }
    }

    Ok(())
}
