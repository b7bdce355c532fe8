//! Configuration module for the welcome bot.
//!
//! Handles the environment-supplied credentials and settings plus the
//! file-based welcome message resource.

mod settings;
mod welcome;

pub use settings::{BotSettings, ConfigError, Credentials};
pub use welcome::WelcomeMessage;
