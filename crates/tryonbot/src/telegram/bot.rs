//! Bot construction and the command menu shown by Telegram clients

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::BotCommand as TgBotCommand;
use teloxide::utils::command::BotCommands;
use tryoncore::core::config;
use tryoncore::{i18n, BotCommand, Language};

/// Commands understood by the dispatcher schema
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start,
    Reset,
    Menu,
    Balance,
    Buy,
}

impl From<Command> for BotCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Start => BotCommand::Start,
            Command::Reset => BotCommand::Reset,
            Command::Menu => BotCommand::Menu,
            Command::Balance => BotCommand::Balance,
            Command::Buy => BotCommand::Buy,
        }
    }
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Invalid BOT_API_URL or HTTP client setup failure
pub fn create_bot() -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        Bot::with_client(config::BOT_TOKEN.as_str(), client).set_api_url(url)
    } else {
        Bot::with_client(config::BOT_TOKEN.as_str(), client)
    };
    Ok(bot)
}

fn command_list(lang: Language) -> Vec<TgBotCommand> {
    [
        ("start", "cmd-start"),
        ("reset", "cmd-reset"),
        ("menu", "cmd-menu"),
        ("balance", "cmd-balance"),
        ("buy", "cmd-buy"),
    ]
    .into_iter()
    .map(|(command, key)| TgBotCommand::new(command, i18n::t(lang, key)))
    .collect()
}

/// Registers the command list for every supported language, Uzbek as the default.
pub async fn setup_all_language_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(command_list(Language::default())).await?;
    for lang in Language::ALL {
        bot.set_my_commands(command_list(lang))
            .language_code(lang.as_str())
            .await?;
    }
    log::info!("Bot commands registered for {} languages", Language::ALL.len());
    Ok(())
}
