use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

/// Client for Bot API calls. Uploads of large videos need more than teloxide's default timeout.
pub fn build_bot_client(upload_timeout: Duration) -> Result<Client> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(upload_timeout)
        .build()?;
    Ok(client)
}
