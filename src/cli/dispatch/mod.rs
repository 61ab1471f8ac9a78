use crate::cli::actions::Action;
use anyhow::{anyhow, Result};
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow!("missing required argument: --dsn"))?,
        token_secret: matches
            .get_one("token-secret")
            .map(|s: &String| SecretString::from(s.to_string()))
            .ok_or_else(|| anyhow!("missing required argument: --token-secret"))?,
        frontend_url: matches
            .get_one("frontend-url")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow!("missing required argument: --frontend-url"))?,
        captcha_verify_url: matches
            .get_one("captcha-verify-url")
            .map(|s: &String| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "gardisto",
            "--dsn",
            "postgres://localhost/gardisto",
            "--token-secret",
            "sekreta",
            "--captcha-verify-url",
            "https://captcha.example.com/verify",
        ]);

        let Action::Server {
            port,
            dsn,
            token_secret,
            frontend_url,
            captcha_verify_url,
        } = handler(&matches)?;

        assert_eq!(port, 8080);
        assert_eq!(dsn, "postgres://localhost/gardisto");
        assert_eq!(token_secret.expose_secret(), "sekreta");
        assert_eq!(frontend_url, "http://localhost:3000");
        assert_eq!(
            captcha_verify_url.as_deref(),
            Some("https://captcha.example.com/verify")
        );
        Ok(())
    }
}
