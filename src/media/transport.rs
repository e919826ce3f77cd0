use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, KeyboardMarkup};
use teloxide::RequestError;
use tracing::warn;

use crate::media::descriptor::MediaHandle;
use crate::media::kind::MediaKind;

const SEND_RETRY_ATTEMPTS: usize = 3;

/// Outbound operations the media core needs from the messaging backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Sends previously uploaded content by its handle.
    async fn send_media(&self, chat_id: i64, handle: &MediaHandle, kind: MediaKind) -> Result<()>;

    /// Uploads `bytes` to `chat_id`, which also delivers them.
    /// Returns `None` when the confirmation carries no handle.
    async fn upload_media(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
        kind: MediaKind,
    ) -> Result<Option<MediaHandle>>;
}

fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

fn handle_from_message(message: &Message, kind: MediaKind) -> Option<MediaHandle> {
    let handle = match kind {
        MediaKind::Image => message
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|photo| photo.file.id.0.clone()),
        MediaKind::Video => message.video().map(|video| video.file.id.0.clone()),
    };
    handle
        .map(MediaHandle::new)
        .filter(|handle| !handle.is_empty())
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    keyboard: KeyboardMarkup,
}

impl TelegramTransport {
    pub fn new(bot: Bot, keyboard: KeyboardMarkup) -> Self {
        Self { bot, keyboard }
    }

    async fn send_media_once(
        &self,
        chat_id: ChatId,
        handle: &MediaHandle,
        kind: MediaKind,
    ) -> Result<Message, RequestError> {
        let input = InputFile::file_id(FileId(handle.as_str().to_string()));
        match kind {
            MediaKind::Image => {
                self.bot
                    .send_photo(chat_id, input)
                    .reply_markup(self.keyboard.clone())
                    .await
            }
            MediaKind::Video => {
                self.bot
                    .send_video(chat_id, input)
                    .reply_markup(self.keyboard.clone())
                    .await
            }
        }
    }
}

#[async_trait]
impl MediaTransport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text.to_string())
            .reply_markup(self.keyboard.clone())
            .await?;
        Ok(())
    }

    async fn send_media(&self, chat_id: i64, handle: &MediaHandle, kind: MediaKind) -> Result<()> {
        let mut delay = Duration::from_secs_f32(1.5);
        for attempt in 0..SEND_RETRY_ATTEMPTS {
            match self.send_media_once(ChatId(chat_id), handle, kind).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if !telegram_retryable_error(&err) || attempt + 1 == SEND_RETRY_ATTEMPTS {
                        return Err(err.into());
                    }
                    warn!("send_{} attempt {} failed: {err}", kind, attempt + 1);
                    if let RequestError::RetryAfter(wait) = err {
                        tokio::time::sleep(wait.duration()).await;
                    } else {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Ok(())
    }

    async fn upload_media(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
        kind: MediaKind,
    ) -> Result<Option<MediaHandle>> {
        let input = InputFile::memory(bytes).file_name(file_name.to_string());
        let message = match kind {
            MediaKind::Image => {
                self.bot
                    .send_photo(ChatId(chat_id), input)
                    .reply_markup(self.keyboard.clone())
                    .await?
            }
            MediaKind::Video => {
                self.bot
                    .send_video(ChatId(chat_id), input)
                    .reply_markup(self.keyboard.clone())
                    .await?
            }
        };
        Ok(handle_from_message(&message, kind))
    }
}
