pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        token_secret: SecretString,
        frontend_url: String,
        captcha_verify_url: Option<String>,
    },
}
