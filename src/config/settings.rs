//! Environment-supplied bot settings and credentials.

use std::path::PathBuf;

/// Credential source for provisioning an unconfigured account.
///
/// The two sources are mutually exclusive; an explicit address/password
/// pair wins over a provisioning code when both are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Direct login with address and password.
    Password { addr: String, password: String },

    /// Single scannable provisioning code encoding the whole login.
    Provisioning { qr: String },
}

impl Credentials {
    /// Reads credentials from `ADDR`/`MAIL_PW` or `CHATMAIL_QR`.
    ///
    /// Returns `None` if no usable source is set. That is only an error
    /// when the account still needs configuring, so the decision is left
    /// to the caller.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_parts(
            std::env::var("ADDR").ok(),
            std::env::var("MAIL_PW").ok(),
            std::env::var("CHATMAIL_QR").ok(),
        )
    }

    fn from_parts(
        addr: Option<String>,
        password: Option<String>,
        qr: Option<String>,
    ) -> Option<Self> {
        if let (Some(addr), Some(password)) = (addr, password) {
            return Some(Self::Password { addr, password });
        }
        qr.map(|qr| Self::Provisioning { qr })
    }
}

/// Bot settings read from the environment.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Display name shown to chat partners. Required, no default.
    pub bot_name: String,
}

impl BotSettings {
    /// Creates settings from environment variables.
    ///
    /// Expects `BOT_NAME` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_name =
            std::env::var("BOT_NAME").map_err(|_| ConfigError::MissingEnvVar("BOT_NAME"))?;
        Ok(Self { bot_name })
    }
}

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Failed to read welcome message file {path}: {source}")]
    WelcomeFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Welcome message file {0} is empty; the bot has no default welcome text")]
    WelcomeFileEmpty(PathBuf),
}
