use std::time::Instant;

use chrono::{DateTime, Utc};
use teloxide::types::Message;
use tracing::info;

use crate::media::MediaKind;

#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: i64,
    user_id: Option<i64>,
    message_id: i64,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl CommandTimer {
    pub fn from_message(command: &str, message: &Message) -> Self {
        let user = message.from.as_ref();
        CommandTimer {
            command: command.to_string(),
            chat_id: message.chat.id.0,
            user_id: user.and_then(|u| i64::try_from(u.id.0).ok()),
            message_id: message.id.0 as i64,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: "bot.timing",
            "event=command_received command={} chat_id={} user_id={:?} message_id={} received_at={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339()
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        info!(
            target: "bot.timing",
            "event=command_completed command={} chat_id={} message_id={} response_sent_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.message_id,
            Utc::now().to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

pub fn start_command_timer(command: &str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    timer.log_received();
    timer
}

pub fn complete_command_timer(timer: &mut CommandTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

/// Wraps a media upload with `upload_request` / `upload_response` timing events.
pub async fn log_upload_timing<T, F, Fut>(
    key: &str,
    kind: MediaKind,
    call: F,
) -> Result<T, anyhow::Error>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: "bot.timing",
        "event=upload_request key={} kind={} started_at={}",
        key,
        kind,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: "bot.timing",
        "event=upload_response key={} kind={} completed_at={} duration_s={:.3} status={}",
        key,
        kind,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status
    );

    result
}
