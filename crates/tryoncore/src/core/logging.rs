//! Logging initialization and startup diagnostics

use anyhow::{Context, Result};
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Sends log records to the terminal and to `log_file_path`.
///
/// The terminal gets debug output in `DEV_MODE`. HTTP client internals are filtered out of both sinks.
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).with_context(|| format!("create log file {}", log_file_path))?;

    let log_config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .add_filter_ignore_str("rustls")
        .build();
    let console_level = if *config::DEV_MODE {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    CombinedLogger::init(vec![
        TermLogger::new(console_level, log_config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Info, log_config, log_file),
    ])
    .context("install logger")?;

    Ok(())
}

/// Logs which external services are configured, without printing secrets.
pub fn log_service_configuration() {
    let state = |configured: bool| if configured { "configured" } else { "missing" };

    log::info!("External services:");
    if *config::ai::USE_MOCK_AI {
        log::warn!("  AI: mock collaborators (USE_MOCK_AI=true)");
    } else {
        log::info!("  Gemini: {}", state(config::ai::GEMINI_API_KEY.is_some()));
        log::info!("  OpenAI prompt composer: {}", state(config::ai::OPENAI_API_KEY.is_some()));
        log::info!("  PixLab background removal: {}", state(config::ai::PIXLAB_API_KEY.is_some()));
    }
    match (&*config::storage::SUPABASE_URL, &*config::storage::SUPABASE_KEY) {
        (Some(url), Some(_)) => log::info!("  Object storage: Supabase at {}", url),
        _ => log::info!("  Object storage: local directory {}", *config::storage::MEDIA_DIR),
    }
    log::info!(
        "  Payments: {} ({})",
        state(config::payments::PROVIDER_TOKEN.is_some()),
        *config::payments::CURRENCY
    );
    log::info!("  Model photo policy: {}", config::policy::MODEL_PHOTO_POLICY.as_str());
    log::info!("  Refund policy: {}", config::policy::REFUND_POLICY.as_str());
    if *config::DEV_MODE {
        log::warn!("  DEV_MODE is on: raw errors are shown to users");
    }
}
