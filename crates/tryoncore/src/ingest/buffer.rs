//! Per-chat debounce of photo bursts.
//!
//! Every photo re-arms the chat's flush timer. When a chat has been quiet for the debounce
//! window its batch is removed from the map in one step and handed to the [`FlushHandler`];
//! a photo arriving while that handler runs starts a fresh batch. Flushes of one chat run one at
//! a time, in the order their batches closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::types::ImageData;

/// A closed batch of photos
#[derive(Debug, Clone, Default)]
pub struct FlushedBatch {
    pub photos: Vec<ImageData>,
    /// Photos that arrived after the batch was full
    pub dropped: usize,
}

/// Consumer of flushed batches
///
/// The buffer never calls `on_flush` for a chat while an earlier flush of that chat is running.
#[async_trait]
pub trait FlushHandler: Send + Sync + 'static {
    async fn on_flush(&self, chat_id: i64, batch: FlushedBatch) -> AppResult<()>;

    /// Called after `on_flush` failed; the batch is already gone.
    async fn on_flush_failed(&self, chat_id: i64, error: &AppError);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("too many chats with pending photos ({0})")]
    BufferFull(usize),
}

/// Tunables for [`PhotoIngestBuffer`]
#[derive(Debug, Clone, Copy)]
pub struct BufferSettings {
    pub debounce: Duration,
    pub max_photos: usize,
    pub max_pending_chats: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            debounce: config::buffer::debounce(),
            max_photos: config::buffer::MAX_PHOTOS_PER_FLUSH,
            max_pending_chats: config::buffer::MAX_PENDING_CHATS,
        }
    }
}

struct PendingBatch {
    photos: Vec<ImageData>,
    dropped: usize,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    pending: DashMap<i64, PendingBatch>,
    in_flight: DashMap<i64, Arc<Mutex<()>>>,
    settings: BufferSettings,
    handler: Arc<dyn FlushHandler>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct PhotoIngestBuffer {
    inner: Arc<Inner>,
}

impl PhotoIngestBuffer {
    pub fn new(handler: Arc<dyn FlushHandler>, settings: BufferSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                in_flight: DashMap::new(),
                settings,
                handler,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Appends a photo and re-arms the chat's flush timer.
    ///
    /// Returns how many photos are now waiting. Photos past the per-flush cap are dropped.
    pub fn on_photo(&self, chat_id: i64, photo: ImageData) -> Result<usize, IngestError> {
        let inner = &self.inner;
        if !inner.pending.contains_key(&chat_id) && inner.pending.len() >= inner.settings.max_pending_chats {
            log::warn!("Photo buffer full, rejecting photo from chat {}", chat_id);
            return Err(IngestError::BufferFull(inner.settings.max_pending_chats));
        }

        let generation = inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let buffered = {
            let mut batch = inner.pending.entry(chat_id).or_insert_with(|| PendingBatch {
                photos: Vec::new(),
                dropped: 0,
                generation,
                timer: None,
            });

            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            if batch.photos.len() < inner.settings.max_photos {
                batch.photos.push(photo);
            } else {
                batch.dropped += 1;
                log::info!(
                    "Chat {} already has {} photos pending, dropping extra photo",
                    chat_id,
                    batch.photos.len()
                );
            }
            batch.generation = generation;
            batch.timer = Some(tokio::spawn(flush_after_quiet(self.inner.clone(), chat_id, generation)));
            batch.photos.len()
        };

        metrics::PENDING_PHOTO_BATCHES.set(inner.pending.len() as f64);
        log::debug!("Chat {}: {} photo(s) pending", chat_id, buffered);
        Ok(buffered)
    }

    /// Drops the chat's pending photos without flushing them
    pub fn discard(&self, chat_id: i64) -> usize {
        let dropped = match self.inner.pending.remove(&chat_id) {
            Some((_, batch)) => {
                if let Some(timer) = batch.timer {
                    timer.abort();
                }
                batch.photos.len()
            }
            None => 0,
        };
        metrics::PENDING_PHOTO_BATCHES.set(self.inner.pending.len() as f64);
        dropped
    }

    pub fn pending_photos(&self, chat_id: i64) -> usize {
        self.inner.pending.get(&chat_id).map(|b| b.photos.len()).unwrap_or(0)
    }

    pub fn pending_chats(&self) -> usize {
        self.inner.pending.len()
    }
}

async fn flush_after_quiet(inner: Arc<Inner>, chat_id: i64, generation: u64) {
    tokio::time::sleep(inner.settings.debounce).await;

    // A newer photo re-armed the timer; that timer owns the batch now.
    let Some((_, batch)) = inner.pending.remove_if(&chat_id, |_, b| b.generation == generation) else {
        return;
    };
    metrics::PENDING_PHOTO_BATCHES.set(inner.pending.len() as f64);

    let flushed = FlushedBatch {
        photos: batch.photos,
        dropped: batch.dropped,
    };
    metrics::FLUSH_BATCH_SIZE.observe(flushed.photos.len() as f64);

    // tokio's mutex is fair, so queued flushes of a chat keep their closing order.
    let slot = inner.in_flight.entry(chat_id).or_default().clone();
    let guard = slot.lock_owned().await;
    log::info!(
        "Chat {}: flushing {} photo(s), {} dropped",
        chat_id,
        flushed.photos.len(),
        flushed.dropped
    );

    if let Err(e) = inner.handler.on_flush(chat_id, flushed).await {
        log::error!("Chat {}: photo flush failed: {}", chat_id, e);
        inner.handler.on_flush_failed(chat_id, &e).await;
    }

    drop(guard);
    inner.in_flight.remove_if(&chat_id, |_, slot| Arc::strong_count(slot) == 1);
}
