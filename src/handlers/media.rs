use anyhow::Result;
use teloxide::prelude::*;
use tracing::info;

use crate::config::file_id_var_name;
use crate::media::MediaCatalog;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMedia {
    pub kind: &'static str,
    pub file_id: String,
    pub file_name: Option<String>,
}

/// The backend handle of a video, photo or animation attached to `message`.
pub fn received_media(message: &Message) -> Option<ReceivedMedia> {
    if let Some(video) = message.video() {
        return Some(ReceivedMedia {
            kind: "video",
            file_id: video.file.id.0.clone(),
            file_name: video.file_name.clone(),
        });
    }
    if let Some(animation) = message.animation() {
        return Some(ReceivedMedia {
            kind: "animation",
            file_id: animation.file.id.0.clone(),
            file_name: animation.file_name.clone(),
        });
    }
    message
        .photo()
        .and_then(|sizes| sizes.last())
        .map(|photo| ReceivedMedia {
            kind: "photo",
            file_id: photo.file.id.0.clone(),
            file_name: None,
        })
}

fn file_id_reply(media: &ReceivedMedia, catalog: &MediaCatalog) -> String {
    let mut text = format!(
        "✅ {} received!\n\nFile ID: {}\n\nCopy this file id into your configuration:",
        media.kind, media.file_id
    );
    if catalog.entries().is_empty() {
        text.push_str(&format!("\nfile_id: {}", media.file_id));
    }
    for entry in catalog.entries() {
        text.push_str(&format!(
            "\n{}={}",
            file_id_var_name(&entry.name),
            media.file_id
        ));
    }
    text
}

pub async fn received_media_handler(state: AppState, message: Message) -> Result<()> {
    let Some(media) = received_media(&message) else {
        return Ok(());
    };
    info!(
        "Received {} in chat {}. File ID: {}, File Name: {:?}",
        media.kind, message.chat.id, media.file_id, media.file_name
    );
    state
        .transport
        .send_text(message.chat.id.0, &file_id_reply(&media, &state.catalog))
        .await
}
