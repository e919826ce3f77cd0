use anyhow::Result;
use teloxide::prelude::*;
use tracing::{error, info, warn};

use crate::config::file_id_var_name;
use crate::media::catalog::CatalogEntry;
use crate::media::{HandleSource, MediaError, MediaKind, ResolveRequest};
use crate::state::{AppState, JOKE_BUTTON, MENU_BUTTON};
use crate::utils::telegram::{start_chat_action_heartbeat, upload_action};
use crate::utils::timing::{complete_command_timer, start_command_timer};

const GREETING_TEXT: &str = "How can I help you?";
const MENU_TEXT: &str = "The menu is not set up yet, but it is on its way!";
const JOKE_TEXT: &str = "😛 Joke

We were selling a sofa. The buyers came and took it away.
Two hours later the phone rings:
- Do you have a cat?
- We do.
- Grey? Striped?
- Yes...
- He doesn't want to part with the sofa.";
const UPLOAD_FAILED_TEXT: &str =
    "⚠️ Could not send the media right now. Please try again in a minute.";

/// How a media request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent(HandleSource),
    NotConfigured,
    Failed,
}

fn upload_notice(kind: MediaKind) -> String {
    let noun = match kind {
        MediaKind::Image => "photo",
        MediaKind::Video => "video",
    };
    format!("⏳ Uploading {noun}... Please wait.")
}

fn not_configured_text(entry: &CatalogEntry) -> String {
    format!(
        "{}\n\nThe media file is not set up yet.\n\nTo set it up:\n1. Put the file (photo or video) at {}\n2. Or set {} to an existing file id",
        entry.label,
        entry.descriptor.location.display(),
        file_id_var_name(&entry.name)
    )
}

fn help_text(state: &AppState) -> String {
    let mut text = String::from(
        "Commands\n\n/start - Show the keyboard\n/joke - Tell a joke\n/menu - Show the menu\n/media <name> - Send a configured media file\n/help - Show this help message\n",
    );
    if state.catalog.entries().is_empty() {
        text.push_str("\nNo media configured.");
    } else {
        text.push_str("\nConfigured media:\n");
        for entry in state.catalog.entries() {
            text.push_str(&format!(
                "{} - /media {} ({})\n",
                entry.label, entry.name, entry.descriptor.kind
            ));
        }
        text.push_str(&format!("\nCached file ids: {}", state.store.len()));
    }
    text
}

fn needs_upload(state: &AppState, entry: &CatalogEntry) -> bool {
    let key = &entry.descriptor.key;
    !state.static_handles.contains(key) && !state.store.has_handle(key)
}

/// Resolves `entry` for `chat_id` and makes sure the media ends up in the chat exactly once.
pub async fn deliver_media(state: &AppState, entry: &CatalogEntry, chat_id: i64) -> Result<Delivery> {
    let request = ResolveRequest::with_notice(chat_id, upload_notice(entry.descriptor.kind));
    match state.resolver.resolve(&entry.descriptor, &request).await {
        Ok(resolution) => {
            if !resolution.already_delivered() {
                state
                    .transport
                    .send_media(chat_id, &resolution.handle, resolution.kind)
                    .await?;
            }
            info!(
                "Delivered {} to chat {} ({:?})",
                entry.name, chat_id, resolution.source
            );
            Ok(Delivery::Sent(resolution.source))
        }
        Err(MediaError::AssetNotConfigured(key)) => {
            warn!("Media {} ({}) is not configured", entry.name, key);
            state
                .transport
                .send_text(chat_id, &not_configured_text(entry))
                .await?;
            Ok(Delivery::NotConfigured)
        }
        Err(err) => {
            error!("Failed to deliver {}: {err}", entry.name);
            state.transport.send_text(chat_id, UPLOAD_FAILED_TEXT).await?;
            Ok(Delivery::Failed)
        }
    }
}

pub async fn media_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    name: Option<String>,
) -> Result<()> {
    let mut timer = start_command_timer("media", &message);
    let chat_id = message.chat.id;

    let entry = match name.as_deref() {
        Some(name) => state.catalog.by_name(name),
        None => None,
    };
    let Some(entry) = entry else {
        let known: Vec<&str> = state
            .catalog
            .entries()
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        state
            .transport
            .send_text(
                chat_id.0,
                &format!("Usage: /media <name>\nAvailable: {}", known.join(", ")),
            )
            .await?;
        complete_command_timer(&mut timer, "usage", name);
        return Ok(());
    };

    let _chat_action = needs_upload(&state, entry).then(|| {
        start_chat_action_heartbeat(bot.clone(), chat_id, upload_action(entry.descriptor.kind))
    });

    match deliver_media(&state, entry, chat_id.0).await {
        Ok(delivery) => {
            let status = match delivery {
                Delivery::Sent(_) => "success",
                Delivery::NotConfigured => "not_configured",
                Delivery::Failed => "error",
            };
            complete_command_timer(&mut timer, status, Some(entry.name.clone()));
            Ok(())
        }
        Err(err) => {
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
            Err(err)
        }
    }
}

pub async fn start_handler(state: AppState, message: Message) -> Result<()> {
    info!(
        "User started bot. Chat ID: {} (set PRELOAD_CHAT_ID to this value to enable media preload)",
        message.chat.id
    );
    state.transport.send_text(message.chat.id.0, GREETING_TEXT).await
}

pub async fn help_handler(state: AppState, message: Message) -> Result<()> {
    state
        .transport
        .send_text(message.chat.id.0, &help_text(&state))
        .await
}

pub async fn joke_handler(state: AppState, message: Message) -> Result<()> {
    state.transport.send_text(message.chat.id.0, JOKE_TEXT).await
}

pub async fn menu_handler(state: AppState, message: Message) -> Result<()> {
    state.transport.send_text(message.chat.id.0, MENU_TEXT).await
}

/// Keyboard presses arrive as plain text matching a button label.
pub fn is_button_text(state: &AppState, text: &str) -> bool {
    let text = text.trim();
    text == JOKE_BUTTON || text == MENU_BUTTON || state.catalog.by_label(text).is_some()
}

pub async fn button_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let text = message.text().unwrap_or_default().trim().to_string();
    if text == JOKE_BUTTON {
        return joke_handler(state, message).await;
    }
    if text == MENU_BUTTON {
        return menu_handler(state, message).await;
    }
    let name = state.catalog.by_label(&text).map(|entry| entry.name.clone());
    media_handler(bot, state, message, name).await
}
