mod config;
mod errors;
mod models;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::config::Config;
use crate::utils::notify::Notifier;
use crate::utils::qis::QisFetcher;
use crate::utils::scheduler::Poller;
use crate::utils::store::{SnapshotStore, SubscriberStore};
use crate::utils::telegram::{schema, BotState, Command, TelegramMessenger};

// Entry point for the async main function, powered by tokio runtime.
#[tokio::main]
async fn main() -> Result<()> {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();
    let config = Config::from_env()?;

    // Initializes logging to the terminal with mixed output (both stdout and stderr) and automatic color support.
    TermLogger::init(
        config.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logging")?;

    let bot = Bot::new(&config.bot_token);
    bot.set_my_commands(Command::bot_commands())
        .await
        .context("Failed to register bot commands")?;

    // Subscribers and the last snapshot live next to each other on disk.
    let subscribers = Arc::new(
        SubscriberStore::open(&config.users_file).context("Failed to load subscriber list")?,
    );
    let fetcher = QisFetcher::new(&config.qis).context("Failed to build the portal client")?;
    let notifier = Notifier::new(
        Arc::new(TelegramMessenger::new(bot.clone())),
        Arc::clone(&subscribers),
        config.owner,
    );
    let store = SnapshotStore::new(&config.grades_file);
    info!("Tracking grades in {}", store.path().display());
    let poller = Poller::new(
        Arc::new(fetcher),
        store,
        notifier,
        config.poll_interval,
    );

    // First check right away, then every interval.
    poller.start();

    let state = Arc::new(BotState {
        poller: Arc::clone(&poller),
        subscribers,
    });

    info!("Bot running");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
