//! The welcome message resource.
//!
//! The message body lives in a plain text file next to the bot. There is
//! deliberately no built-in default: an operator who has not written a
//! welcome text gets a startup error, not a placeholder greeting.

use std::path::Path;

use super::ConfigError;

/// Validated welcome message text.
#[derive(Debug, Clone)]
pub struct WelcomeMessage {
    text: String,
}

impl WelcomeMessage {
    /// Loads the welcome text from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds no visible
    /// text.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|source| ConfigError::WelcomeFileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_text(text).ok_or_else(|| ConfigError::WelcomeFileEmpty(path.to_path_buf()))
    }

    /// Validates raw text as a welcome message.
    ///
    /// Trailing whitespace is trimmed; whitespace-only input counts as
    /// empty and yields `None`.
    #[must_use]
    pub fn from_text(text: String) -> Option<Self> {
        let text = text.trim_end().to_owned();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self { text })
    }

    /// The message body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}
