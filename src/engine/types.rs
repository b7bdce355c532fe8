//! Wire types exchanged with the chat engine.
//!
//! These mirror the subset of the engine's JSON-RPC payloads the bot
//! actually touches. Unknown fields are ignored on deserialization, and
//! unknown enum values fall back to explicit catch-all variants so an
//! engine upgrade cannot break event decoding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an account on the chat engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

/// Identifier of a chat (conversation) within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub u32);

/// Identifier of a single message within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account state as reported by the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Account {
    /// Fully provisioned account, ready for network I/O.
    #[serde(rename_all = "camelCase")]
    Configured {
        id: AccountId,
        #[serde(default)]
        addr: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Account exists but has no working credentials yet.
    Unconfigured { id: AccountId },
}

impl Account {
    /// Returns the account id regardless of configuration state.
    #[must_use]
    pub fn id(&self) -> AccountId {
        match self {
            Self::Configured { id, .. } | Self::Unconfigured { id } => *id,
        }
    }

    /// Whether the account can start network I/O as-is.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured { .. })
    }
}

/// Numeric chat type for one-to-one chats.
pub const CHAT_TYPE_SINGLE: u32 = 100;

/// Numeric chat type for group chats.
pub const CHAT_TYPE_GROUP: u32 = 120;

/// The slice of the engine's chat info the bot cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicChat {
    pub id: ChatId,

    #[serde(default)]
    pub name: String,

    /// Raw numeric chat type, compare against the `CHAT_TYPE_*` constants.
    pub chat_type: u32,
}

impl BasicChat {
    /// Whether this chat is a group (the only kind that gets welcomed).
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.chat_type == CHAT_TYPE_GROUP
    }
}

/// Engine classification of system-generated info messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemMessageType {
    #[default]
    Unknown,
    GroupNameChanged,
    GroupImageChanged,
    MemberAddedToGroup,
    MemberRemovedFromGroup,
    AutocryptSetupMessage,
    SecurejoinMessage,
    /// Any classification this bot does not react to.
    Other,
}

// Hand-written so that unrecognized classifications decode to `Other`
// instead of failing the whole message payload.
impl<'de> Deserialize<'de> for SystemMessageType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "Unknown" => Self::Unknown,
            "GroupNameChanged" => Self::GroupNameChanged,
            "GroupImageChanged" => Self::GroupImageChanged,
            "MemberAddedToGroup" => Self::MemberAddedToGroup,
            "MemberRemovedFromGroup" => Self::MemberRemovedFromGroup,
            "AutocryptSetupMessage" => Self::AutocryptSetupMessage,
            "SecurejoinMessage" => Self::SecurejoinMessage,
            _ => Self::Other,
        })
    }
}

/// The slice of the engine's message info the bot cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MsgId,

    pub chat_id: ChatId,

    /// True for engine-generated info messages (member joined, name
    /// changed, ...) as opposed to user content.
    #[serde(default)]
    pub is_info: bool,

    #[serde(default)]
    pub system_message_type: SystemMessageType,
}

impl Message {
    /// Whether this is the "member added to group" system notice.
    #[must_use]
    pub fn announces_new_member(&self) -> bool {
        self.is_info && self.system_message_type == SystemMessageType::MemberAddedToGroup
    }
}

/// Events pushed by the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum EngineEvent {
    /// A message arrived in some chat.
    #[serde(rename_all = "camelCase")]
    IncomingMsg { chat_id: ChatId, msg_id: MsgId },

    /// Engine-internal log line.
    Info { msg: String },

    /// Engine-internal warning.
    Warning { msg: String },

    /// Engine-internal error.
    Error { msg: String },

    /// Any event kind this bot does not react to.
    #[serde(other)]
    Other,
}

/// Envelope around a pushed event, carrying the account it belongs to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub context_id: AccountId,

    pub event: EngineEvent,
}
