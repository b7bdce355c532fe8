//! Typed chat engine operations used by the bot.
//!
//! [`ChatEngine`] is the seam between the bot logic and the engine
//! subprocess: everything the bot ever asks of the engine goes through this
//! trait, so tests can substitute an in-memory engine and count calls.
//! [`RpcEngine`] is the production implementation over the JSON-RPC
//! transport.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::rpc::{RpcClient, RpcError};
use super::types::{Account, AccountId, BasicChat, ChatId, Message, MsgId};

/// Errors produced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Unexpected chat engine payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Shorthand for results of engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The account lifecycle, messaging, and configuration operations the bot
/// needs from the chat engine.
///
/// All protocol handling, transport, encryption, and message storage live
/// on the other side of this boundary.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Lists all accounts known to the engine.
    async fn list_accounts(&self) -> EngineResult<Vec<Account>>;

    /// Creates a fresh, unconfigured account.
    async fn create_account(&self) -> EngineResult<AccountId>;

    /// Fetches the current state of one account.
    async fn account_info(&self, id: AccountId) -> EngineResult<Account>;

    /// Sets several config keys at once on an account.
    async fn batch_set_config(
        &self,
        id: AccountId,
        entries: &[(&str, &str)],
    ) -> EngineResult<()>;

    /// Applies credentials from a provisioning code.
    async fn set_config_from_qr(&self, id: AccountId, qr: &str) -> EngineResult<()>;

    /// Runs the engine's account configuration (login) procedure.
    async fn configure(&self, id: AccountId) -> EngineResult<()>;

    /// Starts the network receive loop for an already configured account.
    async fn start_io(&self, id: AccountId) -> EngineResult<()>;

    /// Sets a single config key on an account.
    async fn set_config(&self, id: AccountId, key: &str, value: &str) -> EngineResult<()>;

    /// Reads a single config key, `None` if unset.
    async fn get_config(&self, id: AccountId, key: &str) -> EngineResult<Option<String>>;

    /// Fetches the basic info of one chat.
    async fn basic_chat_info(&self, id: AccountId, chat: ChatId) -> EngineResult<BasicChat>;

    /// Fetches the info of one message.
    async fn message_info(&self, id: AccountId, msg: MsgId) -> EngineResult<Message>;

    /// Sends a text message into a chat, returning the new message id.
    async fn send_text(&self, id: AccountId, chat: ChatId, text: &str) -> EngineResult<MsgId>;

    /// Resends already-sent messages to the current chat members.
    async fn resend_messages(&self, id: AccountId, msgs: &[MsgId]) -> EngineResult<()>;

    /// Deletes messages on this device and for other members where possible.
    async fn delete_messages(&self, id: AccountId, msgs: &[MsgId]) -> EngineResult<()>;

    /// Returns the payload of the contact-verification QR code.
    async fn securejoin_qr(&self, id: AccountId) -> EngineResult<String>;
}

/// Production [`ChatEngine`] over the JSON-RPC subprocess transport.
#[derive(Debug)]
pub struct RpcEngine {
    rpc: RpcClient,
}

impl RpcEngine {
    /// Wraps a connected RPC client.
    #[must_use]
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    async fn invoke<T: DeserializeOwned>(&self, method: &str, params: Value) -> EngineResult<T> {
        let value = self.rpc.call(method, params).await?;
        serde_json::from_value(value).map_err(EngineError::Payload)
    }

    async fn invoke_unit(&self, method: &str, params: Value) -> EngineResult<()> {
        self.rpc.call(method, params).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatEngine for RpcEngine {
    async fn list_accounts(&self) -> EngineResult<Vec<Account>> {
        self.invoke("get_all_accounts", json!([])).await
    }

    async fn create_account(&self) -> EngineResult<AccountId> {
        self.invoke("add_account", json!([])).await
    }

    async fn account_info(&self, id: AccountId) -> EngineResult<Account> {
        self.invoke("get_account_info", json!([id])).await
    }

    async fn batch_set_config(
        &self,
        id: AccountId,
        entries: &[(&str, &str)],
    ) -> EngineResult<()> {
        let mut map = Map::new();
        for (key, value) in entries {
            map.insert((*key).to_owned(), Value::String((*value).to_owned()));
        }
        self.invoke_unit("batch_set_config", json!([id, map])).await
    }

    async fn set_config_from_qr(&self, id: AccountId, qr: &str) -> EngineResult<()> {
        self.invoke_unit("set_config_from_qr", json!([id, qr])).await
    }

    async fn configure(&self, id: AccountId) -> EngineResult<()> {
        self.invoke_unit("configure", json!([id])).await
    }

    async fn start_io(&self, id: AccountId) -> EngineResult<()> {
        self.invoke_unit("start_io", json!([id])).await
    }

    async fn set_config(&self, id: AccountId, key: &str, value: &str) -> EngineResult<()> {
        self.invoke_unit("set_config", json!([id, key, value])).await
    }

    async fn get_config(&self, id: AccountId, key: &str) -> EngineResult<Option<String>> {
        self.invoke("get_config", json!([id, key])).await
    }

    async fn basic_chat_info(&self, id: AccountId, chat: ChatId) -> EngineResult<BasicChat> {
        self.invoke("get_basic_chat_info", json!([id, chat])).await
    }

    async fn message_info(&self, id: AccountId, msg: MsgId) -> EngineResult<Message> {
        self.invoke("get_message", json!([id, msg])).await
    }

    async fn send_text(&self, id: AccountId, chat: ChatId, text: &str) -> EngineResult<MsgId> {
        self.invoke("misc_send_text_message", json!([id, chat, text]))
            .await
    }

    async fn resend_messages(&self, id: AccountId, msgs: &[MsgId]) -> EngineResult<()> {
        self.invoke_unit("resend_messages", json!([id, msgs])).await
    }

    async fn delete_messages(&self, id: AccountId, msgs: &[MsgId]) -> EngineResult<()> {
        self.invoke_unit("delete_messages", json!([id, msgs])).await
    }

    async fn securejoin_qr(&self, id: AccountId) -> EngineResult<String> {
        self.invoke("get_chat_securejoin_qr_code", json!([id, null]))
            .await
    }
}
