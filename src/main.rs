use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod config;
mod handlers;
mod media;
mod state;
mod utils;

use config::CONFIG;
use handlers::{commands, media as media_handlers};
use media::{
    run_startup_preload, FileHandleBackend, HandleStore, MediaCatalog, MediaResolver,
    MediaTransport, PreloadOptions, PreloadOrchestrator, PreloadSettings, TelegramTransport,
};
use state::{main_keyboard, AppState};
use utils::http::build_bot_client;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Joke,
    Menu,
    Media(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_level, Path::new("logs"));

    if CONFIG.bot_token.is_empty() {
        return Err("BOT_TOKEN is required".into());
    }

    let client = build_bot_client(Duration::from_secs(CONFIG.upload_timeout_seconds))?;
    let bot = Bot::with_client(CONFIG.bot_token.clone(), client);
    info!("Starting media handle bot");

    let store = Arc::new(HandleStore::open(Arc::new(FileHandleBackend::new(
        CONFIG.file_id_cache_path.clone(),
    ))));
    let (catalog, static_handles) = MediaCatalog::build(&CONFIG.media_entries, &CONFIG.media_root);
    let catalog = Arc::new(catalog);
    let static_handles = Arc::new(static_handles);

    let transport: Arc<dyn MediaTransport> =
        Arc::new(TelegramTransport::new(bot.clone(), main_keyboard(&catalog)));
    let resolver = Arc::new(MediaResolver::standard(
        Arc::clone(&static_handles),
        Arc::clone(&store),
        Arc::clone(&transport),
    ));
    let orchestrator = Arc::new(PreloadOrchestrator::new(
        Arc::clone(&resolver),
        Arc::clone(&store),
        Arc::clone(&static_handles),
        PreloadSettings {
            workers: CONFIG.preload_workers,
            queue_capacity: CONFIG.preload_queue_capacity,
        },
    ));
    let state = AppState::new(
        Arc::clone(&catalog),
        static_handles,
        store,
        resolver,
        transport,
    );

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| {
                msg.video().is_some() || msg.animation().is_some() || msg.photo().is_some()
            })
            .endpoint(handle_received_media),
        )
        .branch(
            dptree::filter(|state: AppState, msg: Message| {
                msg.text()
                    .map(|text| commands::is_button_text(&state, text))
                    .unwrap_or(false)
            })
            .endpoint(handle_button),
        )
        .endpoint(ignore_message);

    let mut dispatcher = Dispatcher::builder(bot, message_handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    tokio::spawn(run_startup_preload(
        orchestrator,
        catalog.descriptors(),
        PreloadOptions {
            enabled: CONFIG.preload_enabled,
            chat_id: CONFIG.preload_chat_id,
            delay: CONFIG.preload_delay(),
        },
    ));

    dispatcher.dispatch().await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(state, message).await?,
        Command::Help => commands::help_handler(state, message).await?,
        Command::Joke => commands::joke_handler(state, message).await?,
        Command::Menu => commands::menu_handler(state, message).await?,
        Command::Media(arg) => {
            let name = Some(arg.trim().to_string()).filter(|name| !name.is_empty());
            tokio::spawn(async move {
                if let Err(err) = commands::media_handler(bot, state, message, name).await {
                    error!("media handler failed: {err}");
                }
            });
        }
    }
    Ok(())
}

async fn handle_button(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = commands::button_handler(bot, state, message).await {
            error!("button handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_received_media(state: AppState, message: Message) -> HandlerResult {
    media_handlers::received_media_handler(state, message).await?;
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
