//! The welcome bot controller.
//!
//! Startup brings the engine account online; after that the whole behavior
//! is one event handler. The first message in a group plants the welcome
//! message and records its id; later "member added" notices resend that
//! same message; every triggering message is deleted for privacy.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::WelcomeStore;
use crate::config::Credentials;
use crate::engine::{Account, AccountId, ChatEngine, ChatId, EngineError, EngineResult, MsgId};

/// Errors during the startup sequence. All of these are fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Credentials missing, you need to set ADDR and MAIL_PW, or CHATMAIL_QR")]
    MissingCredentials,

    #[error("Chat engine could not configure the account: {0}")]
    Configure(#[source] EngineError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Resolves the bot account: the first existing account, or a new one.
///
/// # Errors
///
/// Returns an error if the engine account operations fail.
pub async fn resolve_account(engine: &dyn ChatEngine) -> EngineResult<Account> {
    if let Some(account) = engine.list_accounts().await?.into_iter().next() {
        return Ok(account);
    }

    let id = engine.create_account().await?;
    info!("Created new account {}", id);
    engine.account_info(id).await
}

/// Brings the account online.
///
/// An unconfigured account is provisioned from the given credentials and
/// flagged as an e2ee-enabled bot before the engine's configuration
/// procedure runs. An already configured account just starts network I/O.
///
/// # Errors
///
/// Returns [`StartupError::MissingCredentials`] when the account needs
/// configuring and no credential source is available; the configuration
/// procedure is not attempted in that case.
pub async fn bring_online(
    engine: &dyn ChatEngine,
    account: &Account,
    credentials: Option<&Credentials>,
) -> Result<(), StartupError> {
    match account {
        Account::Unconfigured { id } => {
            info!("Account {} not configured, trying to log in now...", id);

            match credentials.ok_or(StartupError::MissingCredentials)? {
                Credentials::Password { addr, password } => {
                    engine
                        .batch_set_config(
                            *id,
                            &[("addr", addr.as_str()), ("mail_pw", password.as_str())],
                        )
                        .await?;
                }
                Credentials::Provisioning { qr } => {
                    engine.set_config_from_qr(*id, qr).await?;
                }
            }

            engine
                .batch_set_config(*id, &[("bot", "1"), ("e2ee_enabled", "1")])
                .await?;
            engine
                .configure(*id)
                .await
                .map_err(StartupError::Configure)?;
            info!("Account {} configured", id);
        }
        Account::Configured { id, .. } => {
            engine.start_io(*id).await?;
        }
    }

    Ok(())
}

/// One async mutex per chat, created on first use.
///
/// Two concurrent events in the same never-welcomed chat would otherwise
/// both read an absent record and both send a welcome message.
#[derive(Default)]
struct ChatLocks {
    inner: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    async fn acquire(&self, chat: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(chat).or_default())
        };
        lock.lock_owned().await
    }
}

/// The bot's event-handling half: owns the welcome text and reacts to
/// incoming messages.
pub struct WelcomeBot {
    engine: Arc<dyn ChatEngine>,
    account: AccountId,
    store: WelcomeStore,
    welcome_text: String,
    locks: ChatLocks,
}

impl WelcomeBot {
    /// Creates the controller for one account.
    #[must_use]
    pub fn new(engine: Arc<dyn ChatEngine>, account: AccountId, welcome_text: String) -> Self {
        Self {
            store: WelcomeStore::new(Arc::clone(&engine), account),
            engine,
            account,
            welcome_text,
            locks: ChatLocks::default(),
        }
    }

    /// The text sent as the welcome message.
    #[must_use]
    pub fn welcome_text(&self) -> &str {
        &self.welcome_text
    }

    /// Handles one `IncomingMsg` event.
    ///
    /// The welcome decision and the record update run under a per-chat
    /// lock; the triggering message is deleted afterwards no matter which
    /// branch was taken, deletion is not gated on send success.
    ///
    /// # Errors
    ///
    /// Returns the first engine failure encountered. Callers report it and
    /// move on; one failed event must not affect other chats.
    pub async fn handle_incoming(&self, chat_id: ChatId, msg_id: MsgId) -> EngineResult<()> {
        let _guard = self.locks.acquire(chat_id).await;

        let outcome = self.apply_welcome_policy(chat_id, msg_id).await;

        // Delete the message for the bot - for privacy.
        let cleanup = self.engine.delete_messages(self.account, &[msg_id]).await;

        match (outcome, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!(%chat_id, %msg_id, "Could not delete triggering message: {}", cleanup_err);
                Err(e)
            }
        }
    }

    async fn apply_welcome_policy(&self, chat_id: ChatId, msg_id: MsgId) -> EngineResult<()> {
        let chat = self.engine.basic_chat_info(self.account, chat_id).await?;
        if !chat.is_group() {
            debug!(%chat_id, "Not a group chat, no welcome");
            return Ok(());
        }

        match self.store.get(chat_id).await? {
            Some(welcome_id) => {
                // Already welcomed. Only a "member added" notice warrants
                // re-announcing the original message.
                let msg = self.engine.message_info(self.account, msg_id).await?;
                if msg.announces_new_member() {
                    info!(%chat_id, %welcome_id, "Member joined, resending welcome message");
                    self.engine
                        .resend_messages(self.account, &[welcome_id])
                        .await?;
                }
            }
            None => {
                let sent = self
                    .engine
                    .send_text(self.account, chat_id, &self.welcome_text)
                    .await?;
                self.store.set(chat_id, sent).await?;
                info!(%chat_id, welcome_id = %sent, "Sent welcome message");
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for WelcomeBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WelcomeBot")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::engine::{
        BasicChat, CHAT_TYPE_GROUP, CHAT_TYPE_SINGLE, Message, RpcError, SystemMessageType,
    };

    const ACCT: AccountId = AccountId(1);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        BatchSetConfig(Vec<(String, String)>),
        SetConfigFromQr(String),
        Configure,
        StartIo,
        SetConfig(String, String),
        GetConfig(String),
        SendText(ChatId, String),
        Resend(Vec<MsgId>),
        Delete(Vec<MsgId>),
    }

    /// In-memory engine that records every call.
    #[derive(Default)]
    struct MockEngine {
        calls: StdMutex<Vec<Call>>,
        accounts: StdMutex<Vec<Account>>,
        chat_types: StdMutex<HashMap<ChatId, u32>>,
        messages: StdMutex<HashMap<MsgId, Message>>,
        config: StdMutex<HashMap<String, String>>,
        next_msg_id: AtomicU32,
        fail_send: bool,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                next_msg_id: AtomicU32::new(99),
                ..Self::default()
            }
        }

        fn with_group(chat: ChatId) -> Self {
            let mock = Self::new();
            mock.chat_types.lock().unwrap().insert(chat, CHAT_TYPE_GROUP);
            mock
        }

        fn with_single(chat: ChatId) -> Self {
            let mock = Self::new();
            mock.chat_types
                .lock()
                .unwrap()
                .insert(chat, CHAT_TYPE_SINGLE);
            mock
        }

        fn add_message(&self, id: MsgId, is_info: bool, kind: SystemMessageType) {
            self.messages.lock().unwrap().insert(
                id,
                Message {
                    id,
                    chat_id: ChatId(0),
                    is_info,
                    system_message_type: kind,
                },
            );
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn sends(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::SendText(..)))
                .collect()
        }

        fn deletes(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Delete(..)))
                .collect()
        }

        fn resends(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Resend(..)))
                .collect()
        }

        fn stored(&self, key: &str) -> Option<String> {
            self.config.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl ChatEngine for MockEngine {
        async fn list_accounts(&self) -> EngineResult<Vec<Account>> {
            Ok(self.accounts.lock().unwrap().clone())
        }

        async fn create_account(&self) -> EngineResult<AccountId> {
            let account = Account::Unconfigured { id: ACCT };
            self.accounts.lock().unwrap().push(account);
            Ok(ACCT)
        }

        async fn account_info(&self, id: AccountId) -> EngineResult<Account> {
            Ok(Account::Unconfigured { id })
        }

        async fn batch_set_config(
            &self,
            _id: AccountId,
            entries: &[(&str, &str)],
        ) -> EngineResult<()> {
            self.record(Call::BatchSetConfig(
                entries
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ));
            Ok(())
        }

        async fn set_config_from_qr(&self, _id: AccountId, qr: &str) -> EngineResult<()> {
            self.record(Call::SetConfigFromQr(qr.to_owned()));
            Ok(())
        }

        async fn configure(&self, _id: AccountId) -> EngineResult<()> {
            self.record(Call::Configure);
            Ok(())
        }

        async fn start_io(&self, _id: AccountId) -> EngineResult<()> {
            self.record(Call::StartIo);
            Ok(())
        }

        async fn set_config(&self, _id: AccountId, key: &str, value: &str) -> EngineResult<()> {
            self.record(Call::SetConfig(key.to_owned(), value.to_owned()));
            self.config
                .lock()
                .unwrap()
                .insert(key.to_owned(), value.to_owned());
            Ok(())
        }

        async fn get_config(&self, _id: AccountId, key: &str) -> EngineResult<Option<String>> {
            self.record(Call::GetConfig(key.to_owned()));
            let value = self.config.lock().unwrap().get(key).cloned();
            // Widen the race window between record read and write.
            tokio::task::yield_now().await;
            Ok(value)
        }

        async fn basic_chat_info(&self, _id: AccountId, chat: ChatId) -> EngineResult<BasicChat> {
            let chat_type = self
                .chat_types
                .lock()
                .unwrap()
                .get(&chat)
                .copied()
                .unwrap_or(CHAT_TYPE_SINGLE);
            Ok(BasicChat {
                id: chat,
                name: String::new(),
                chat_type,
            })
        }

        async fn message_info(&self, _id: AccountId, msg: MsgId) -> EngineResult<Message> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .get(&msg)
                .cloned()
                .unwrap_or(Message {
                    id: msg,
                    chat_id: ChatId(0),
                    is_info: false,
                    system_message_type: SystemMessageType::Unknown,
                }))
        }

        async fn send_text(
            &self,
            _id: AccountId,
            chat: ChatId,
            text: &str,
        ) -> EngineResult<MsgId> {
            self.record(Call::SendText(chat, text.to_owned()));
            tokio::task::yield_now().await;
            if self.fail_send {
                return Err(EngineError::Rpc(RpcError::Engine {
                    code: 1,
                    message: "send failed".to_owned(),
                }));
            }
            Ok(MsgId(self.next_msg_id.fetch_add(1, Ordering::Relaxed)))
        }

        async fn resend_messages(&self, _id: AccountId, msgs: &[MsgId]) -> EngineResult<()> {
            self.record(Call::Resend(msgs.to_vec()));
            Ok(())
        }

        async fn delete_messages(&self, _id: AccountId, msgs: &[MsgId]) -> EngineResult<()> {
            self.record(Call::Delete(msgs.to_vec()));
            Ok(())
        }

        async fn securejoin_qr(&self, _id: AccountId) -> EngineResult<String> {
            Ok("OPENPGP4FPR:TESTFINGERPRINT".to_owned())
        }
    }

    fn bot_over(engine: &Arc<MockEngine>) -> WelcomeBot {
        WelcomeBot::new(
            Arc::clone(engine) as Arc<dyn ChatEngine>,
            ACCT,
            "Welcome to the group!".to_owned(),
        )
    }

    #[tokio::test]
    async fn test_first_group_message_sends_and_records() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(42), MsgId(7)).await.unwrap();

        assert_eq!(
            engine.sends(),
            vec![Call::SendText(ChatId(42), "Welcome to the group!".to_owned())]
        );
        assert_eq!(
            engine.stored("ui.42.welcome_msgid").as_deref(),
            Some("99")
        );
        assert_eq!(engine.deletes(), vec![Call::Delete(vec![MsgId(7)])]);
    }

    #[tokio::test]
    async fn test_repeated_messages_send_only_once() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(42), MsgId(7)).await.unwrap();
        bot.handle_incoming(ChatId(42), MsgId(8)).await.unwrap();
        bot.handle_incoming(ChatId(42), MsgId(9)).await.unwrap();

        assert_eq!(engine.sends().len(), 1);
        assert!(engine.resends().is_empty());
        assert_eq!(engine.deletes().len(), 3);
    }

    #[tokio::test]
    async fn test_member_added_triggers_resend() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        engine
            .config
            .lock()
            .unwrap()
            .insert("ui.42.welcome_msgid".to_owned(), "99".to_owned());
        engine.add_message(MsgId(8), true, SystemMessageType::MemberAddedToGroup);
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(42), MsgId(8)).await.unwrap();

        assert!(engine.sends().is_empty());
        assert_eq!(engine.resends(), vec![Call::Resend(vec![MsgId(99)])]);
        assert_eq!(engine.deletes(), vec![Call::Delete(vec![MsgId(8)])]);
    }

    #[tokio::test]
    async fn test_other_info_messages_do_not_resend() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        engine
            .config
            .lock()
            .unwrap()
            .insert("ui.42.welcome_msgid".to_owned(), "99".to_owned());
        engine.add_message(MsgId(8), true, SystemMessageType::GroupNameChanged);
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(42), MsgId(8)).await.unwrap();

        assert!(engine.sends().is_empty());
        assert!(engine.resends().is_empty());
        assert_eq!(engine.deletes(), vec![Call::Delete(vec![MsgId(8)])]);
    }

    #[tokio::test]
    async fn test_non_group_chat_only_deletes() {
        let engine = Arc::new(MockEngine::with_single(ChatId(7)));
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(7), MsgId(5)).await.unwrap();

        let calls = engine.calls();
        assert_eq!(calls, vec![Call::Delete(vec![MsgId(5)])]);
    }

    #[tokio::test]
    async fn test_delete_runs_even_when_send_fails() {
        let mut mock = MockEngine::with_group(ChatId(42));
        mock.fail_send = true;
        let engine = Arc::new(mock);
        let bot = bot_over(&engine);

        let result = bot.handle_incoming(ChatId(42), MsgId(7)).await;

        assert!(result.is_err());
        assert_eq!(engine.deletes(), vec![Call::Delete(vec![MsgId(7)])]);
        assert_eq!(engine.stored("ui.42.welcome_msgid"), None);
    }

    #[tokio::test]
    async fn test_concurrent_first_events_send_once() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        let bot = Arc::new(bot_over(&engine));

        let a = tokio::spawn({
            let bot = Arc::clone(&bot);
            async move { bot.handle_incoming(ChatId(42), MsgId(7)).await }
        });
        let b = tokio::spawn({
            let bot = Arc::clone(&bot);
            async move { bot.handle_incoming(ChatId(42), MsgId(8)).await }
        });

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(engine.sends().len(), 1);
        assert_eq!(engine.deletes().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_record_is_overwritten() {
        let engine = Arc::new(MockEngine::with_group(ChatId(42)));
        engine
            .config
            .lock()
            .unwrap()
            .insert("ui.42.welcome_msgid".to_owned(), "not-a-number".to_owned());
        let bot = bot_over(&engine);

        bot.handle_incoming(ChatId(42), MsgId(7)).await.unwrap();

        assert_eq!(engine.sends().len(), 1);
        assert_eq!(
            engine.stored("ui.42.welcome_msgid").as_deref(),
            Some("99")
        );
    }

    #[tokio::test]
    async fn test_resolve_account_reuses_existing() {
        let engine = MockEngine::new();
        engine.accounts.lock().unwrap().push(Account::Configured {
            id: AccountId(3),
            addr: Some("bot@example.org".to_owned()),
            display_name: None,
        });

        let account = resolve_account(&engine).await.unwrap();
        assert_eq!(account.id(), AccountId(3));
        assert!(account.is_configured());
    }

    #[tokio::test]
    async fn test_resolve_account_creates_when_none() {
        let engine = MockEngine::new();
        let account = resolve_account(&engine).await.unwrap();
        assert_eq!(account.id(), ACCT);
        assert!(!account.is_configured());
    }

    #[tokio::test]
    async fn test_provision_with_password_pair() {
        let engine = MockEngine::new();
        let account = Account::Unconfigured { id: ACCT };
        let creds = Credentials::Password {
            addr: "a@x".to_owned(),
            password: "p".to_owned(),
        };

        bring_online(&engine, &account, Some(&creds)).await.unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                Call::BatchSetConfig(vec![
                    ("addr".to_owned(), "a@x".to_owned()),
                    ("mail_pw".to_owned(), "p".to_owned()),
                ]),
                Call::BatchSetConfig(vec![
                    ("bot".to_owned(), "1".to_owned()),
                    ("e2ee_enabled".to_owned(), "1".to_owned()),
                ]),
                Call::Configure,
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_with_qr_code() {
        let engine = MockEngine::new();
        let account = Account::Unconfigured { id: ACCT };
        let creds = Credentials::Provisioning {
            qr: "DCACCOUNT:https://nine.testrun.org".to_owned(),
        };

        bring_online(&engine, &account, Some(&creds)).await.unwrap();

        assert_eq!(
            engine.calls(),
            vec![
                Call::SetConfigFromQr("DCACCOUNT:https://nine.testrun.org".to_owned()),
                Call::BatchSetConfig(vec![
                    ("bot".to_owned(), "1".to_owned()),
                    ("e2ee_enabled".to_owned(), "1".to_owned()),
                ]),
                Call::Configure,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_never_configures() {
        let engine = MockEngine::new();
        let account = Account::Unconfigured { id: ACCT };

        let err = bring_online(&engine, &account, None).await.unwrap_err();

        assert!(matches!(err, StartupError::MissingCredentials));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_configured_account_starts_io() {
        let engine = MockEngine::new();
        let account = Account::Configured {
            id: ACCT,
            addr: Some("bot@example.org".to_owned()),
            display_name: Some("Bot".to_owned()),
        };

        bring_online(&engine, &account, None).await.unwrap();

        assert_eq!(engine.calls(), vec![Call::StartIo]);
    }
}
