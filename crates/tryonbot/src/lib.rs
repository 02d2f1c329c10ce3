//! Telegram front-end for the try-on core: CLI, teloxide dispatcher and the HTTP surface.

pub mod cli;
pub mod telegram;
pub mod web_server;

use std::sync::Arc;

use tryoncore::core::{config, RateLimitedDispatcher, RetryPolicy, UpstreamGateway};
use tryoncore::session::CreditRules;
use tryoncore::storage::objects;
use tryoncore::{
    AiServices, Analytics, AppResult, BufferSettings, DbPool, GenerationPipeline, Messenger, PhotoIngestBuffer,
    PhotoIntake, Router, RouterDeps, SessionStateMachine,
};

/// Wires the router and its collaborators from configuration.
pub fn build_router(pool: Arc<DbPool>, messenger: Arc<dyn Messenger>) -> AppResult<(Router, Arc<GenerationPipeline>)> {
    let machine = Arc::new(SessionStateMachine::new(pool.clone(), CreditRules::default()));
    let analytics = Analytics::new(pool);
    let ai = AiServices::from_env()?;
    let store = objects::from_env()?;
    let policy = *config::policy::MODEL_PHOTO_POLICY;

    let vision = UpstreamGateway::new(
        RateLimitedDispatcher::new("vision", config::dispatcher::min_interval()),
        RetryPolicy::new(),
    );
    let aux = UpstreamGateway::new(
        RateLimitedDispatcher::new("aux", config::dispatcher::aux_min_interval()),
        RetryPolicy::new(),
    );

    let settings = BufferSettings {
        debounce: config::buffer::debounce(),
        max_photos: config::buffer::MAX_PHOTOS_PER_FLUSH,
        max_pending_chats: config::buffer::MAX_PENDING_CHATS,
    };
    let intake = Arc::new(PhotoIntake::new(
        machine.clone(),
        ai.clone(),
        vision.clone(),
        store.clone(),
        analytics.clone(),
        messenger.clone(),
        policy,
        settings.max_photos,
    ));
    let buffer = PhotoIngestBuffer::new(intake, settings);

    let pipeline = Arc::new(GenerationPipeline::new(
        machine.clone(),
        ai,
        vision,
        aux,
        store,
        analytics.clone(),
        *config::policy::REFUND_POLICY,
    ));

    let router = Router::new(RouterDeps {
        machine,
        pipeline: pipeline.clone(),
        buffer,
        analytics,
        messenger,
        policy,
        currency: config::payments::CURRENCY.clone(),
        payments_enabled: config::payments::PROVIDER_TOKEN.is_some(),
    });
    Ok((router, pipeline))
}
