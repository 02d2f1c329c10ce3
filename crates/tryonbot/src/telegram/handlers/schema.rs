//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{ChatKind, Message, PreCheckoutQuery};
use tryoncore::{EventKind, InboundEvent};

use super::types::{event_from_callback, event_from_message, user_meta, HandlerDeps, HandlerError};
use crate::telegram::bot::Command;

/// Creates the dispatcher schema.
///
/// Every branch only converts the Telegram update into an `InboundEvent` for the router;
/// the pre-checkout query is the one update answered here, since Telegram needs the verdict
/// within seconds.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_payment = deps.clone();
    let deps_commands = deps.clone();
    let deps_messages = deps.clone();
    let deps_precheckout = deps.clone();
    let deps_callback = deps;

    dptree::entry()
        // Successful payment handler must be first
        .branch(successful_payment_handler(deps_payment))
        .branch(command_handler(deps_commands))
        .branch(message_handler(deps_messages))
        .branch(pre_checkout_handler(deps_precheckout))
        .branch(callback_handler(deps_callback))
}

fn is_private(msg: &Message) -> bool {
    matches!(msg.chat.kind, ChatKind::Private(_))
}

/// Handler for successful Telegram payments
fn successful_payment_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.successful_payment().is_some())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                log::info!("Received successful_payment message in chat {}", msg.chat.id);
                if let Some(event) = event_from_message(&msg) {
                    deps.router.handle(event).await;
                }
                Ok(())
            }
        })
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command: {:?} from chat {}", cmd, msg.chat.id);
                let event = InboundEvent {
                    chat_id: msg.chat.id.0,
                    user: user_meta(msg.from.as_ref()),
                    kind: EventKind::Command(cmd.into()),
                };
                deps.router.handle(event).await;
                Ok(())
            }
        },
    ))
}

/// Photos and free text from private chats
fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| is_private(&msg))
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                match event_from_message(&msg) {
                    Some(event) => deps.router.handle(event).await,
                    None => log::debug!("Ignoring unsupported message in chat {}", msg.chat.id),
                }
                Ok(())
            }
        })
}

fn pre_checkout_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_pre_checkout_query().endpoint(move |bot: Bot, query: PreCheckoutQuery| {
        let deps = deps.clone();
        async move {
            let user_id = i64::try_from(query.from.id.0).unwrap_or_default();
            log::info!(
                "Received pre_checkout_query: id={}, payload={}",
                query.id,
                query.invoice_payload
            );

            let verdict = deps
                .router
                .check_checkout(user_id, &query.invoice_payload, &query.currency, query.total_amount);
            let answer = match verdict {
                Ok(()) => bot.answer_pre_checkout_query(query.id.clone(), true).await,
                Err(message) => {
                    bot.answer_pre_checkout_query(query.id.clone(), false)
                        .error_message(message)
                        .await
                }
            };
            if let Err(e) = answer {
                log::error!("Failed to answer pre_checkout_query: {:?}", e);
            }
            Ok(())
        }
    })
}

/// Handler for callback queries (inline keyboard buttons)
fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
                log::warn!("Failed to answer callback query: {}", e);
            }
            if let Some(event) = event_from_callback(&q) {
                deps.router.handle(event).await;
            }
            Ok(())
        }
    })
}
