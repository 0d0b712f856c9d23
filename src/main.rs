mod bot;
mod chat;
mod config;
mod tasks;

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use bot::{Command, Outcome, Router, TelegramClient};
use chat::Client as ChatClient;
use config::{Config, StorageKind};
use tasks::{Database, MemoryStore, StorageError, TaskStore};

const DEFAULT_CONFIG_PATH: &str = "taskbot.json";

/// Everything the handlers need, built once at startup.
struct BotState {
    router: Router<TelegramClient>,
    telegram: Arc<TelegramClient>,
    chat: ChatClient,
    bot_username: String,
}

impl BotState {
    async fn new(config: &Config, bot: &Bot) -> Result<Self, String> {
        // Commands addressed as /cmd@name need the bot's own username;
        // without it only bare /cmd parses.
        let bot_username = bot
            .get_me()
            .await
            .map(|me| me.username().to_string())
            .unwrap_or_else(|e| {
                warn!("Could not look up bot username, /cmd@bot will not parse: {e}");
                String::new()
            });
        info!("Answering as @{bot_username} for owner {}", config.owner_id);

        let store: Arc<dyn TaskStore> = match config.storage {
            StorageKind::Sqlite => {
                let path = config.database_path();
                info!("Using SQLite task storage at {}", path.display());
                Arc::new(Database::open(&path).map_err(|e| format!("Failed to open task database: {e}"))?)
            }
            StorageKind::Memory => {
                info!("Using in-memory task storage; tasks will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let chat = ChatClient::new(
            config.openai_api_key.clone(),
            config.chat_api_url.clone(),
            config.chat_model.clone(),
            config.chat_timeout,
            config.chat_max_retries,
        )
        .map_err(|e| format!("Failed to build chat client: {e}"))?;

        let telegram = Arc::new(TelegramClient::new(bot.clone(), config.owner_chat()));
        let router = Router::new(config.owner_id, store, telegram.clone());

        Ok(Self { router, telegram, chat, bot_username })
    }
}

/// Log to stdout and to `<data_dir>/logs/taskbot.log`, both filtered by
/// `RUST_LOG` on top of `info`. Keep the guard alive to flush the file.
fn init_logging(data_dir: &Path) -> Result<WorkerGuard, String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|e| format!("failed to create {}: {e}", log_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("taskbot.log"))
        .map_err(|e| format!("failed to open log file: {e}"))?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let filter = || EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout).with_filter(filter()))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false).with_filter(filter()))
        .init();
    Ok(guard)
}

fn load_config() -> Result<(Config, String), config::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => Config::load(&path).map(|c| (c, path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).map(|c| (c, DEFAULT_CONFIG_PATH.to_string()))
        }
        None => Config::from_env().map(|c| (c, "environment".to_string())),
    }
}

#[tokio::main]
async fn main() {
    let (config, config_source) = match load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("taskbot: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = match init_logging(&config.data_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("taskbot: {e}");
            std::process::exit(1);
        }
    };

    info!("🚀 Starting taskbot (config: {config_source}, data dir: {})", config.data_dir.display());

    let bot = Bot::new(&config.telegram_bot_token);

    let state = match BotState::new(&config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    match state.router.restore() {
        Ok(n) => info!("{} reminder(s) pending", n),
        Err(e) => warn!("Failed to restore reminders: {e}"),
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register command menu: {e}");
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutting down ({} reminder timer(s) dropped)", state.router.scheduler().pending());
    state.router.shutdown();
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let now = Local::now().naive_local();
    let result = match Command::parse(text, &state.bot_username) {
        Ok(command) => state.router.handle_command(user.id, command, now),
        Err(_) => state.router.handle_text(user.id, text, now),
    };

    perform(&state, result).await;
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let data = query.data.as_deref().unwrap_or_default();
    let result = state.router.handle_callback(query.from.id, data);

    if state.router.is_owner(query.from.id)
        && let Err(e) = bot.answer_callback_query(query.id.clone()).await
    {
        warn!("Failed to answer callback: {e}");
    }

    perform(&state, result).await;
    Ok(())
}

/// Carry out what the router decided.
async fn perform(state: &BotState, result: Result<Outcome, StorageError>) {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Task storage failed: {e}");
            return;
        }
    };

    match outcome {
        Outcome::Ignore => {}
        Outcome::Reply(reply) => {
            // Failures are already logged by the client
            let _ = state.telegram.send_reply(&reply).await;
        }
        Outcome::Pages(pages) => {
            for page in &pages {
                if state.telegram.send_reply(page).await.is_err() {
                    break;
                }
            }
        }
        Outcome::Chat { prompt } => {
            state.telegram.send_typing().await;
            let answer = match state.chat.complete(&prompt).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Chat request failed: {e}");
                    format!("⚠️ Chat request failed: {e}")
                }
            };
            let _ = state.telegram.send_text(&answer).await;
        }
    }
}
