//! [`Messenger`] over the Telegram Bot API

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove,
    LabeledPrice, MessageId, ReplyMarkup,
};
use tryoncore::core::config;
use tryoncore::{AppError, AppResult, ImageData, Invoice, Markup, Messenger};
use url::Url;

/// Converts a transport-neutral keyboard into Telegram's reply markup
pub fn reply_markup(markup: Markup) -> Option<ReplyMarkup> {
    match markup {
        Markup::None => None,
        Markup::Inline(rows) => Some(ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(|b| InlineKeyboardButton::callback(b.text, b.data))),
        ))),
        Markup::Menu(rows) => Some(ReplyMarkup::Keyboard(
            KeyboardMarkup::new(rows.into_iter().map(|row| row.into_iter().map(KeyboardButton::new))).resize_keyboard(),
        )),
        Markup::RemoveMenu => Some(ReplyMarkup::KeyboardRemove(KeyboardRemove::new())),
    }
}

/// `<api>/file/bot<token>/<path>`
pub fn file_url(api_url: &Url, token: &str, file_path: &str) -> AppResult<Url> {
    let mut url = api_url.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| AppError::Config("Bot API URL cannot be a base URL".to_string()))?;
        segments.pop_if_empty();
        segments.push("file");
        segments.push(&format!("bot{}", token));
        for segment in file_path.split('/').filter(|s| !s.is_empty()) {
            segments.push(segment);
        }
    }
    Ok(url)
}

fn transport_error(e: teloxide::RequestError) -> AppError {
    AppError::Transport(e.to_string())
}

pub struct TelegramMessenger {
    bot: Bot,
    http: reqwest::Client,
    provider_token: Option<String>,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, provider_token: Option<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(config::network::timeout()).build()?;
        Ok(Self {
            bot,
            http,
            provider_token,
        })
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Markup) -> AppResult<i32> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(markup) = reply_markup(markup) {
            request = request.reply_markup(markup);
        }
        let message = request.await.map_err(transport_error)?;
        Ok(message.id.0)
    }

    async fn send_photo(&self, chat_id: i64, photo: &ImageData, caption: Option<&str>, markup: Markup) -> AppResult<()> {
        let file = InputFile::memory(photo.bytes.to_vec()).file_name(format!("look.{}", photo.extension()));
        let mut request = self.bot.send_photo(ChatId(chat_id), file);
        if let Some(caption) = caption {
            request = request.caption(caption);
        }
        if let Some(markup) = reply_markup(markup) {
            request = request.reply_markup(markup);
        }
        request.await.map_err(transport_error)?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> AppResult<()> {
        let Some(token) = self.provider_token.clone() else {
            return Err(AppError::Config("PAYMENT_PROVIDER_TOKEN is not set".to_string()));
        };
        self.bot
            .send_invoice(
                ChatId(chat_id),
                invoice.title.clone(),
                invoice.description.clone(),
                invoice.payload.clone(),
                invoice.currency.clone(),
                vec![LabeledPrice::new(invoice.label.clone(), invoice.amount)],
            )
            .provider_token(token)
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn download_photo(&self, file_id: &str) -> AppResult<ImageData> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(transport_error)?;
        let url = file_url(&self.bot.api_url(), self.bot.token(), &file.path)?;

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "Telegram file download failed (path={}, status={})",
                file.path, status
            )));
        }
        let bytes = response.bytes().await?;
        log::debug!("Downloaded {} ({} bytes)", file.path, bytes.len());
        Ok(ImageData::new(bytes, ImageData::mime_for_path(&file.path)))
    }
}
