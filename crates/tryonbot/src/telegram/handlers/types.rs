//! Handler dependencies and update-to-event conversion

use teloxide::types::{CallbackQuery, Message, PhotoSize, User};
use tryoncore::{EventKind, InboundEvent, PaymentNotice, Router, UserMeta};

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub router: Router,
}

impl HandlerDeps {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

pub fn user_meta(user: Option<&User>) -> UserMeta {
    UserMeta {
        username: user.and_then(|u| u.username.clone()),
        first_name: user.map(|u| u.first_name.clone()),
        language_code: user.and_then(|u| u.language_code.clone()),
    }
}

/// Largest rendition of a photo message
pub fn best_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

/// Photo, text and payment messages; anything else yields `None`.
pub fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let kind = if let Some(payment) = msg.successful_payment() {
        EventKind::Payment(PaymentNotice {
            payload: payment.invoice_payload.clone(),
            currency: payment.currency.clone(),
            total_amount: payment.total_amount,
            charge_id: payment.telegram_payment_charge_id.0.clone(),
        })
    } else if let Some(photo) = msg.photo().and_then(best_photo) {
        EventKind::Photo {
            file_id: photo.file.id.0.clone(),
        }
    } else if let Some(text) = msg.text() {
        EventKind::Text(text.to_string())
    } else {
        return None;
    };

    Some(InboundEvent {
        chat_id: msg.chat.id.0,
        user: user_meta(msg.from.as_ref()),
        kind,
    })
}

/// Button presses; the chat is the one holding the message, or the user's private chat.
pub fn event_from_callback(q: &CallbackQuery) -> Option<InboundEvent> {
    let data = q.data.clone()?;
    let chat_id = match &q.message {
        Some(message) => message.chat().id.0,
        None => i64::try_from(q.from.id.0).ok()?,
    };
    Some(InboundEvent {
        chat_id,
        user: user_meta(Some(&q.from)),
        kind: EventKind::Callback { data },
    })
}
