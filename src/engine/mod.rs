//! Chat engine collaborator.
//!
//! The engine owns accounts, chats, messages, and the per-account config
//! store; this module is the bot's view of it: wire types, the stdio
//! JSON-RPC transport, and the typed operation boundary.

mod client;
mod rpc;
mod types;

pub use client::{ChatEngine, EngineError, EngineResult, RpcEngine};
pub use rpc::{RpcClient, RpcError};
pub use types::{
    Account, AccountId, BasicChat, CHAT_TYPE_GROUP, CHAT_TYPE_SINGLE, ChatId, EngineEvent,
    EventEnvelope, Message, MsgId, SystemMessageType,
};
