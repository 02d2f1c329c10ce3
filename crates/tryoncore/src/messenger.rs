//! Outbound messaging seam.
//!
//! The router and photo intake talk to users only through [`Messenger`]; the bot crate
//! implements it over the Telegram Bot API and tests use a recording fake.

use async_trait::async_trait;

use crate::core::error::AppResult;
use crate::core::types::ImageData;

/// Inline button carrying callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Keyboard attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Markup {
    #[default]
    None,
    /// Inline buttons, one inner vec per row
    Inline(Vec<Vec<Button>>),
    /// Persistent reply keyboard, one inner vec per row
    Menu(Vec<Vec<String>>),
    RemoveMenu,
}

impl Markup {
    /// One button per row
    pub fn column(buttons: Vec<Button>) -> Self {
        Markup::Inline(buttons.into_iter().map(|b| vec![b]).collect())
    }
}

/// Payment invoice for a credit package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub label: String,
    /// Price in minor currency units
    pub amount: u32,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends a text message and returns its id
    async fn send_text(&self, chat_id: i64, text: &str, markup: Markup) -> AppResult<i32>;

    async fn send_photo(&self, chat_id: i64, photo: &ImageData, caption: Option<&str>, markup: Markup) -> AppResult<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()>;

    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> AppResult<()>;

    /// Fetches the bytes of an inbound photo
    async fn download_photo(&self, file_id: &str) -> AppResult<ImageData>;
}
