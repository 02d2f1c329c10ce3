//! Tryoncore - virtual try-on bot core, independent of Telegram
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, rate-limited dispatch and retries
//! - `session`: durable per-chat state machine, credits and the survey
//! - `ingest`: debounced photo buffering
//! - `intake`: interpretation of flushed photo batches
//! - `generation`: the try-on generation pipeline and prompts
//! - `ai`: vendor clients and offline mocks behind capability traits
//! - `storage`: SQLite persistence, object storage and analytics
//! - `router`: inbound event handling

#![allow(clippy::too_many_arguments)]

pub mod ai;
pub mod core;
pub mod generation;
pub mod i18n;
pub mod ingest;
pub mod intake;
pub mod keyboards;
pub mod messenger;
pub mod payments;
pub mod router;
pub mod session;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult, ImageData, ImageRef, Language, UpstreamError};
pub use ai::AiServices;
pub use generation::{GenerationOutcome, GenerationPipeline, RefundPolicy};
pub use ingest::{BufferSettings, PhotoIngestBuffer};
pub use intake::PhotoIntake;
pub use messenger::{Button, Invoice, Markup, Messenger};
pub use router::{BotCommand, EventKind, InboundEvent, PaymentNotice, Router, RouterDeps};
pub use session::{SessionStateMachine, UserMeta};
pub use storage::{create_pool, get_connection, Analytics, DbConnection, DbPool};
