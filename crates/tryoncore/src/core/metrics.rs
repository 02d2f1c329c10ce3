//! Prometheus metrics for the try-on bot
//!
//! Grouped by concern:
//! - Dispatch (vendor queue wait, upstream errors, retries)
//! - Photo intake (flushes, batch sizes, pending buffers)
//! - Generation and credits
//! - Funnel and payments

#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

// ======================
// DISPATCH METRICS
// ======================

lazy_static! {
    /// Time a vendor call spends queued before its dispatcher slot opens
    /// Labels: dispatcher (vision/aux)
    pub static ref DISPATCH_WAIT_SECONDS: HistogramVec = register_histogram_vec!(
        "tryon_dispatch_wait_seconds",
        "Time vendor calls wait in the rate-limited queue",
        &["dispatcher"],
        vec![0.01, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("register tryon_dispatch_wait_seconds");

    /// Failed vendor calls after retries, by classified kind
    /// Labels: dispatcher, kind (quota/safety/transport/...)
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tryon_upstream_errors_total",
        "Vendor call failures by classified kind",
        &["dispatcher", "kind"]
    )
    .expect("register tryon_upstream_errors_total");

    pub static ref UPSTREAM_RETRIES_TOTAL: Counter = register_counter!(
        "tryon_upstream_retries_total",
        "Vendor call retries"
    )
    .expect("register tryon_upstream_retries_total");
}

// ======================
// PHOTO INTAKE METRICS
// ======================

lazy_static! {
    /// Labels: interpretation (model/outfit/ignored)
    pub static ref PHOTO_FLUSHES_TOTAL: CounterVec = register_counter_vec!(
        "tryon_photo_flushes_total",
        "Debounced photo batches handed to intake",
        &["interpretation"]
    )
    .expect("register tryon_photo_flushes_total");

    pub static ref FLUSH_BATCH_SIZE: Histogram = register_histogram!(
        "tryon_flush_batch_size",
        "Photos per flushed batch",
        vec![1.0, 2.0, 3.0, 4.0, 6.0, 10.0]
    )
    .expect("register tryon_flush_batch_size");

    pub static ref PENDING_PHOTO_BATCHES: Gauge = register_gauge!(
        "tryon_pending_photo_batches",
        "Chats with photos waiting for the debounce window"
    )
    .expect("register tryon_pending_photo_batches");
}

// ======================
// GENERATION & CREDITS
// ======================

lazy_static! {
    /// Labels: outcome (success/quota/safety/failed/refused)
    pub static ref GENERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "tryon_generations_total",
        "Generation attempts by outcome",
        &["outcome"]
    )
    .expect("register tryon_generations_total");

    pub static ref GENERATION_DURATION_SECONDS: Histogram = register_histogram!(
        "tryon_generation_duration_seconds",
        "Wall time of a generation attempt including queueing",
        vec![5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("register tryon_generation_duration_seconds");

    pub static ref CREDITS_DEBITED_TOTAL: Counter = register_counter!(
        "tryon_credits_debited_total",
        "Credits debited for generations"
    )
    .expect("register tryon_credits_debited_total");

    pub static ref CREDITS_REFUNDED_TOTAL: Counter = register_counter!(
        "tryon_credits_refunded_total",
        "Credits refunded after failed generations"
    )
    .expect("register tryon_credits_refunded_total");

    /// Labels: reason (monthly/payment/gift/survey)
    pub static ref CREDITS_GRANTED_TOTAL: CounterVec = register_counter_vec!(
        "tryon_credits_granted_total",
        "Credits added to balances",
        &["reason"]
    )
    .expect("register tryon_credits_granted_total");
}

// ======================
// FUNNEL & PAYMENTS
// ======================

lazy_static! {
    /// Labels: step
    pub static ref FUNNEL_STEPS_TOTAL: CounterVec = register_counter_vec!(
        "tryon_funnel_steps_total",
        "Users reaching each onboarding/generation step",
        &["step"]
    )
    .expect("register tryon_funnel_steps_total");

    /// Labels: package
    pub static ref PAYMENTS_TOTAL: CounterVec = register_counter_vec!(
        "tryon_payments_total",
        "Successful credit purchases",
        &["package"]
    )
    .expect("register tryon_payments_total");

    /// Labels: phase (target phase)
    pub static ref SESSION_TRANSITIONS_TOTAL: CounterVec = register_counter_vec!(
        "tryon_session_transitions_total",
        "Session phase transitions by target phase",
        &["phase"]
    )
    .expect("register tryon_session_transitions_total");
}

/// Initialize metrics (call this at startup to register all metrics)
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    let _ = &*DISPATCH_WAIT_SECONDS;
    let _ = &*UPSTREAM_ERRORS_TOTAL;
    let _ = &*UPSTREAM_RETRIES_TOTAL;
    let _ = &*PHOTO_FLUSHES_TOTAL;
    let _ = &*FLUSH_BATCH_SIZE;
    let _ = &*PENDING_PHOTO_BATCHES;
    let _ = &*GENERATION_DURATION_SECONDS;
    let _ = &*CREDITS_DEBITED_TOTAL;
    let _ = &*CREDITS_REFUNDED_TOTAL;
    let _ = &*PAYMENTS_TOTAL;
    let _ = &*SESSION_TRANSITIONS_TOTAL;

    // Make the common series visible in /metrics before the first event
    for outcome in ["success", "quota", "safety", "failed", "refused"] {
        GENERATIONS_TOTAL.with_label_values(&[outcome]);
    }
    for reason in ["monthly", "payment", "gift", "survey"] {
        CREDITS_GRANTED_TOTAL.with_label_values(&[reason]);
    }
    for step in crate::storage::analytics::FunnelStep::ALL {
        FUNNEL_STEPS_TOTAL.with_label_values(&[step.as_str()]);
    }

    log::info!("Metrics registry initialized");
}

/// Encodes every registered metric in the Prometheus text exposition format.
pub fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((
        encoder.format_type().to_string(),
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

pub fn record_generation(outcome: &str) {
    GENERATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_credits_granted(reason: &str, amount: i64) {
    if amount > 0 {
        CREDITS_GRANTED_TOTAL.with_label_values(&[reason]).inc_by(amount as f64);
    }
}
