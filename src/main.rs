//! Welcome Bot - Main Entry Point
//!
//! A chat bot that sends a one-time welcome message into every group it is
//! added to, resends it whenever a new member joins, and deletes the
//! triggering messages for privacy.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use welcome_bot::bot::{WelcomeBot, bring_online, print_contact_banner, resolve_account};
use welcome_bot::config::{BotSettings, Credentials, WelcomeMessage};
use welcome_bot::engine::{
    AccountId, ChatEngine, EngineEvent, EventEnvelope, RpcClient, RpcEngine,
};

/// Chat bot that welcomes new group members.
#[derive(Parser, Debug)]
#[command(name = "welcome_bot")]
#[command(about = "Send a one-time welcome message to every group")]
#[command(version)]
struct Args {
    /// Path to the chat engine RPC server binary.
    #[arg(long, default_value = "deltachat-rpc-server")]
    engine: PathBuf,

    /// Directory where the engine keeps account data.
    #[arg(long, default_value = "deltachat-data")]
    accounts_dir: PathBuf,

    /// Path to the welcome message text file.
    #[arg(short, long, default_value = "welcome.txt")]
    welcome_file: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write an example welcome message file and exit.
    #[arg(long)]
    generate_welcome: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Handle example welcome generation
    if args.generate_welcome {
        return generate_example_welcome();
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let credentials = Credentials::from_env();
    let settings =
        BotSettings::from_env().context("Failed to load bot settings from environment")?;
    let welcome =
        WelcomeMessage::load(&args.welcome_file).context("Failed to load the welcome message")?;

    // Start the chat engine subprocess
    let (rpc, mut events) = RpcClient::spawn(&args.engine, &args.accounts_dir)
        .await
        .context("Failed to start the chat engine")?;
    let engine: Arc<dyn ChatEngine> = Arc::new(RpcEngine::new(rpc));

    // Resolve and bring up the bot account
    let account = resolve_account(engine.as_ref())
        .await
        .context("Failed to resolve the bot account")?;
    let account_id = account.id();

    bring_online(engine.as_ref(), &account, credentials.as_ref())
        .await
        .context("Could not log in to account")?;

    engine
        .set_config(account_id, "displayname", &settings.bot_name)
        .await
        .context("Failed to set the bot display name")?;

    let bot = Arc::new(WelcomeBot::new(
        Arc::clone(&engine),
        account_id,
        welcome.text().to_owned(),
    ));

    // Operator diagnostics
    let addr = engine
        .get_config(account_id, "addr")
        .await
        .context("Failed to read the bot address")?
        .unwrap_or_else(|| "<unknown>".to_owned());
    let verification = engine
        .securejoin_qr(account_id)
        .await
        .context("Failed to fetch the verification code")?;
    print_contact_banner(&addr, &verification, bot.welcome_text());

    info!("Bot is running as {}. Use Ctrl+C to stop.", addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            envelope = events.recv() => {
                let Some(envelope) = envelope else {
                    warn!("Chat engine event stream ended");
                    break;
                };
                dispatch_event(&bot, account_id, envelope);
            }
        }
    }

    Ok(())
}

/// Routes one pushed engine event.
///
/// Incoming messages run as their own task so a slow or failing handler
/// never blocks the event loop or other chats.
fn dispatch_event(bot: &Arc<WelcomeBot>, account: AccountId, envelope: EventEnvelope) {
    if envelope.context_id != account {
        trace!("Ignoring event for account {}", envelope.context_id);
        return;
    }

    match envelope.event {
        EngineEvent::IncomingMsg { chat_id, msg_id } => {
            let bot = Arc::clone(bot);
            tokio::spawn(async move {
                if let Err(e) = bot.handle_incoming(chat_id, msg_id).await {
                    error!(%chat_id, %msg_id, "Failed to handle incoming message: {}", e);
                }
            });
        }
        EngineEvent::Info { msg } => debug!("[core] {}", msg),
        EngineEvent::Warning { msg } => warn!("[core] {}", msg),
        EngineEvent::Error { msg } => error!("[core] {}", msg),
        EngineEvent::Other => {}
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Writes an example welcome message file.
fn generate_example_welcome() -> Result<()> {
    const EXAMPLE: &str = "Welcome to the group!\n\nPlease read the pinned rules before posting.\n";

    std::fs::write("welcome.example.txt", EXAMPLE)?;

    println!("✓ Example welcome message written to: welcome.example.txt");
    println!("\nTo use this bot:");
    println!("1. Copy welcome.example.txt to welcome.txt and edit the text");
    println!("2. Create a .env file with ADDR and MAIL_PW (or CHATMAIL_QR) and BOT_NAME");
    println!("3. Run: welcome_bot");

    Ok(())
}
