use std::sync::Arc;

use teloxide::types::{KeyboardButton, KeyboardMarkup};

use crate::media::{HandleStore, MediaCatalog, MediaResolver, MediaTransport, StaticHandles};

pub const JOKE_BUTTON: &str = "😛 Joke";
pub const MENU_BUTTON: &str = "✅ Menu";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<MediaCatalog>,
    pub static_handles: Arc<StaticHandles>,
    pub store: Arc<HandleStore>,
    pub resolver: Arc<MediaResolver>,
    pub transport: Arc<dyn MediaTransport>,
}

impl AppState {
    pub fn new(
        catalog: Arc<MediaCatalog>,
        static_handles: Arc<StaticHandles>,
        store: Arc<HandleStore>,
        resolver: Arc<MediaResolver>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        AppState {
            catalog,
            static_handles,
            store,
            resolver,
            transport,
        }
    }
}

/// Two buttons per row: the fixed joke/menu pair, then one per catalog label.
pub fn main_keyboard(catalog: &MediaCatalog) -> KeyboardMarkup {
    let labels: Vec<String> = [JOKE_BUTTON.to_string(), MENU_BUTTON.to_string()]
        .into_iter()
        .chain(catalog.labels())
        .collect();
    let rows: Vec<Vec<KeyboardButton>> = labels
        .chunks(2)
        .map(|row| row.iter().map(KeyboardButton::new).collect())
        .collect();

    let mut markup = KeyboardMarkup::new(rows);
    markup.resize_keyboard = true;
    markup
}
