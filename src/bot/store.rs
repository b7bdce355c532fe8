//! Typed access to the per-chat welcome record.
//!
//! The record is the only durable state the bot depends on: the id of the
//! welcome message sent into a chat, or absent when none was sent yet. It
//! lives in the engine's per-account config store under
//! `ui.<chatId>.welcome_msgid`, so it survives restarts without the bot
//! keeping any local files.

use std::sync::Arc;

use tracing::warn;

use crate::engine::{AccountId, ChatEngine, ChatId, EngineResult, MsgId};

/// Typed view of the welcome records of one account.
pub struct WelcomeStore {
    engine: Arc<dyn ChatEngine>,
    account: AccountId,
}

impl WelcomeStore {
    /// Creates a store over the given account's config.
    #[must_use]
    pub fn new(engine: Arc<dyn ChatEngine>, account: AccountId) -> Self {
        Self { engine, account }
    }

    fn key(chat: ChatId) -> String {
        format!("ui.{chat}.welcome_msgid")
    }

    /// Reads the welcome record of a chat.
    ///
    /// A stored value that does not parse as a message id is logged and
    /// treated as absent, so the next group event overwrites it instead of
    /// wedging the chat on a corrupt record.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine config read fails.
    pub async fn get(&self, chat: ChatId) -> EngineResult<Option<MsgId>> {
        let Some(raw) = self.engine.get_config(self.account, &Self::key(chat)).await? else {
            return Ok(None);
        };

        match raw.parse::<u32>() {
            Ok(id) => Ok(Some(MsgId(id))),
            Err(_) => {
                warn!(%chat, value = %raw, "Unparsable welcome record, treating as absent");
                Ok(None)
            }
        }
    }

    /// Records the welcome message id of a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine config write fails.
    pub async fn set(&self, chat: ChatId, msg: MsgId) -> EngineResult<()> {
        self.engine
            .set_config(self.account, &Self::key(chat), &msg.to_string())
            .await
    }
}

impl std::fmt::Debug for WelcomeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WelcomeStore")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(WelcomeStore::key(ChatId(42)), "ui.42.welcome_msgid");
        assert_eq!(WelcomeStore::key(ChatId(0)), "ui.0.welcome_msgid");
    }
}
