use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use teloxide::prelude::*;
use tokio::time::sleep;

use tryonbot::cli::{Cli, Commands};
use tryonbot::telegram::{create_bot, schema, setup_all_language_commands, HandlerDeps, TelegramMessenger};
use tryonbot::web_server::{self, WebState};
use tryoncore::core::logging::{init_logger, log_service_configuration};
use tryoncore::core::{config, metrics};
use tryoncore::storage::DateFilter;
use tryoncore::{create_pool, Analytics};

/// Without a subcommand the bot runs with the HTTP surface enabled.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Staging variables must be loaded before any config static is read
    if matches!(cli.command, Some(Commands::RunStaging { .. })) {
        if let Err(e) = dotenvy::from_filename(".env.staging") {
            eprintln!("Failed to load .env.staging: {}", e);
        }
    }
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run { no_web }) => {
            log::info!("Running bot in normal mode (web: {})", !no_web);
            run_bot(!no_web).await
        }
        Some(Commands::RunStaging { no_web }) => {
            log::info!("Running bot in staging mode (web: {})", !no_web);
            run_bot(!no_web).await
        }
        Some(Commands::Migrate) => run_migrate(),
        Some(Commands::Report { filter }) => run_report(&filter),
        None => {
            log::info!("No subcommand given, running the bot");
            run_bot(true).await
        }
    }
}

/// Opening the pool applies pending migrations.
fn run_migrate() -> Result<()> {
    create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to migrate database: {}", e))?;
    log::info!("Database at {} is up to date", *config::DATABASE_PATH);
    Ok(())
}

fn run_report(filter: &str) -> Result<()> {
    let filter: DateFilter = filter.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let pool = Arc::new(
        create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );
    let report = Analytics::new(pool).report(filter)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_bot(with_web: bool) -> Result<()> {
    let started = std::time::Instant::now();
    log::info!("Starting try-on bot");

    metrics::init_metrics();
    log_service_configuration();

    let bot = create_bot()?;
    let me = wait_for_bot_api(&bot).await?;
    log::info!("Connected as @{} (id {})", me.username(), me.id);

    if let Err(e) = setup_all_language_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let db_pool = Arc::new(
        create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );

    let messenger = Arc::new(TelegramMessenger::new(
        bot.clone(),
        config::payments::PROVIDER_TOKEN.clone(),
    )?);
    let (router, pipeline) = tryonbot::build_router(db_pool, messenger)?;

    let recovered = pipeline.recover_interrupted()?;
    if !recovered.is_empty() {
        log::warn!("Settled {} generation(s) interrupted by the last shutdown", recovered.len());
    }

    if with_web {
        let port = *config::web::PORT;
        let state = WebState::new(router.clone(), config::web::ADMIN_API_TOKEN.clone());
        if config::web::ADMIN_API_TOKEN.is_none() {
            log::warn!("ADMIN_API_TOKEN is not set, /api/* is unauthenticated");
        }
        tokio::spawn(async move {
            if let Err(e) = web_server::start_web_server(port, state).await {
                log::error!("Web server error: {}", e);
            }
        });
    } else {
        log::info!("HTTP surface disabled (--no-web)");
    }

    log::info!("Ready in {:.2}s, long polling", started.elapsed().as_secs_f64());

    Dispatcher::builder(bot, schema(HandlerDeps::new(router.clone())))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Dispatcher stopped, waiting for running generations...");
    router.wait_idle().await;
    log::info!("Shutdown complete");
    Ok(())
}

/// A self-hosted Bot API server may still be starting; poll `getMe` for up to a minute.
async fn wait_for_bot_api(bot: &Bot) -> Result<teloxide::types::Me> {
    const ATTEMPTS: u32 = 12;
    let mut attempt = 1;
    loop {
        match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e) if attempt < ATTEMPTS => {
                log::warn!("Bot API unreachable ({}/{}): {}", attempt, ATTEMPTS, e);
                attempt += 1;
                sleep(Duration::from_secs(5)).await;
            }
            Err(e) => return Err(anyhow::anyhow!("Bot API unreachable after {} attempts: {}", ATTEMPTS, e)),
        }
    }
}
