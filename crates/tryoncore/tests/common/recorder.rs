//! Messenger that records every outgoing call instead of talking to Telegram

#![allow(dead_code)]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tryoncore::{AppError, AppResult, ImageData, Invoice, Markup, Messenger};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat_id: i64,
        message_id: i32,
        text: String,
        markup: Markup,
    },
    Photo {
        chat_id: i64,
        image: ImageData,
        caption: Option<String>,
    },
    Deleted {
        chat_id: i64,
        message_id: i32,
    },
    Invoice {
        chat_id: i64,
        invoice: Invoice,
    },
}

impl Sent {
    pub fn chat_id(&self) -> i64 {
        match self {
            Sent::Text { chat_id, .. }
            | Sent::Photo { chat_id, .. }
            | Sent::Deleted { chat_id, .. }
            | Sent::Invoice { chat_id, .. } => *chat_id,
        }
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("lock").clear();
    }

    /// Texts sent to `chat_id`, oldest first
    pub fn texts(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { chat_id: c, text, .. } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self, chat_id: i64) -> Option<String> {
        self.texts(chat_id).pop()
    }

    pub fn last_markup(&self, chat_id: i64) -> Option<Markup> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Text { chat_id: c, markup, .. } if c == chat_id => Some(markup),
            _ => None,
        })
    }

    pub fn photos(&self, chat_id: i64) -> Vec<(ImageData, Option<String>)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Photo {
                    chat_id: c,
                    image,
                    caption,
                } if c == chat_id => Some((image, caption)),
                _ => None,
            })
            .collect()
    }

    /// Whether `text` was sent to the chat and that message deleted afterwards
    pub fn sent_then_deleted(&self, chat_id: i64, text: &str) -> bool {
        let sent = self.sent();
        let Some((at, id)) = sent.iter().enumerate().find_map(|(at, s)| match s {
            Sent::Text {
                chat_id: c,
                message_id,
                text: t,
                ..
            } if *c == chat_id && t == text => Some((at, *message_id)),
            _ => None,
        }) else {
            return false;
        };
        sent[at..]
            .iter()
            .any(|s| matches!(s, Sent::Deleted { chat_id: c, message_id } if *c == chat_id && *message_id == id))
    }

    pub fn invoices(&self, chat_id: i64) -> Vec<Invoice> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Invoice { chat_id: c, invoice } if c == chat_id => Some(invoice),
                _ => None,
            })
            .collect()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().expect("lock").push(sent);
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Markup) -> AppResult<i32> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.push(Sent::Text {
            chat_id,
            message_id,
            text: text.to_string(),
            markup,
        });
        Ok(message_id)
    }

    async fn send_photo(&self, chat_id: i64, photo: &ImageData, caption: Option<&str>, _markup: Markup) -> AppResult<()> {
        self.push(Sent::Photo {
            chat_id,
            image: photo.clone(),
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()> {
        self.push(Sent::Deleted { chat_id, message_id });
        Ok(())
    }

    async fn send_invoice(&self, chat_id: i64, invoice: &Invoice) -> AppResult<()> {
        self.push(Sent::Invoice {
            chat_id,
            invoice: invoice.clone(),
        });
        Ok(())
    }

    /// `file_id`s starting with "broken" fail; others download as their own bytes.
    async fn download_photo(&self, file_id: &str) -> AppResult<ImageData> {
        if file_id.starts_with("broken") {
            return Err(AppError::Transport(format!("file {} is gone", file_id)));
        }
        Ok(ImageData::jpeg(file_id.as_bytes().to_vec()))
    }
}
