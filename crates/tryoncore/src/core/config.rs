use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: tryon.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "tryon.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// When true, raw error text is shown to users instead of translated category messages
pub static DEV_MODE: Lazy<bool> = Lazy::new(|| env_flag("DEV_MODE"));

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// External AI services
pub mod ai {
    use super::{env_flag, env_non_empty, Lazy};

    pub static GEMINI_API_KEY: Lazy<Option<String>> = Lazy::new(|| env_non_empty("GEMINI_API_KEY"));
    pub static GEMINI_BASE_URL: Lazy<String> = Lazy::new(|| {
        env_non_empty("GEMINI_BASE_URL").unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string())
    });
    /// Model used for validation, categorization and isolation
    pub static GEMINI_VISION_MODEL: Lazy<String> =
        Lazy::new(|| env_non_empty("GEMINI_VISION_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string()));
    /// Model used for image synthesis
    pub static GEMINI_IMAGE_MODEL: Lazy<String> =
        Lazy::new(|| env_non_empty("GEMINI_IMAGE_MODEL").unwrap_or_else(|| "gemini-2.5-flash-image".to_string()));

    pub static OPENAI_API_KEY: Lazy<Option<String>> = Lazy::new(|| env_non_empty("OPENAI_API_KEY"));
    pub static OPENAI_BASE_URL: Lazy<String> =
        Lazy::new(|| env_non_empty("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com".to_string()));
    pub static OPENAI_MODEL: Lazy<String> =
        Lazy::new(|| env_non_empty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()));

    pub static PIXLAB_API_KEY: Lazy<Option<String>> = Lazy::new(|| env_non_empty("PIXLAB_API_KEY"));
    pub static PIXLAB_BASE_URL: Lazy<String> =
        Lazy::new(|| env_non_empty("PIXLAB_BASE_URL").unwrap_or_else(|| "https://api.pixlab.io".to_string()));

    /// Use deterministic offline collaborators instead of the vendors
    pub static USE_MOCK_AI: Lazy<bool> = Lazy::new(|| env_flag("USE_MOCK_AI"));

    /// HTTP timeout for a single vendor call (image generation is slow)
    pub const REQUEST_TIMEOUT_SECS: u64 = 120;
}

/// Object storage
pub mod storage {
    use super::{env_non_empty, Lazy};

    pub static SUPABASE_URL: Lazy<Option<String>> = Lazy::new(|| env_non_empty("SUPABASE_URL"));
    pub static SUPABASE_KEY: Lazy<Option<String>> = Lazy::new(|| env_non_empty("SUPABASE_KEY"));
    pub static SUPABASE_BUCKET: Lazy<String> =
        Lazy::new(|| env_non_empty("SUPABASE_BUCKET").unwrap_or_else(|| "tryon".to_string()));
    /// Local fallback directory when Supabase is not configured
    pub static MEDIA_DIR: Lazy<String> = Lazy::new(|| env_non_empty("MEDIA_DIR").unwrap_or_else(|| "media".to_string()));
}

/// Rate-limited dispatch of external calls
pub mod dispatcher {
    use super::Duration;

    /// Minimum spacing between two vision/image vendor calls
    pub const MIN_INTERVAL_MS: u64 = 5000;

    /// Spacing for the auxiliary vendors (prompt composer, background removal)
    pub const AUX_MIN_INTERVAL_MS: u64 = 1000;

    pub fn min_interval() -> Duration {
        Duration::from_millis(MIN_INTERVAL_MS)
    }

    pub fn aux_min_interval() -> Duration {
        Duration::from_millis(AUX_MIN_INTERVAL_MS)
    }
}

/// Retry configuration for vendor calls
pub mod retry {
    use super::Duration;

    pub const MAX_RETRIES: u32 = 1;

    pub const INITIAL_DELAY_MS: u64 = 2000;

    pub const BACKOFF_MULTIPLIER: f64 = 2.0;

    pub fn initial_delay() -> Duration {
        Duration::from_millis(INITIAL_DELAY_MS)
    }
}

/// Photo debounce buffer
pub mod buffer {
    use super::Duration;

    /// Quiet period after the last photo before the batch is flushed
    pub const DEBOUNCE_MS: u64 = 3000;

    pub const MAX_PHOTOS_PER_FLUSH: usize = 4;

    /// Upper bound on chats with a pending (not yet flushed) batch
    pub const MAX_PENDING_CHATS: usize = 10_000;

    pub fn debounce() -> Duration {
        Duration::from_millis(DEBOUNCE_MS)
    }
}

/// Credit economy
pub mod credits {
    pub const INITIAL: i64 = 30;

    pub const GEN_COST: i64 = 10;

    pub const MONTHLY_GRANT: i64 = 30;

    pub const SURVEY_REWARD: i64 = 30;
}

/// Generation and validation policies
pub mod policy {
    use super::{env_non_empty, Lazy};
    use crate::generation::RefundPolicy;
    use crate::session::ModelPhotoPolicy;

    /// Read from MODEL_PHOTO_POLICY (full_body | waist_up)
    pub static MODEL_PHOTO_POLICY: Lazy<ModelPhotoPolicy> = Lazy::new(|| {
        env_non_empty("MODEL_PHOTO_POLICY")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    });

    /// Read from REFUND_POLICY (never | system_faults | always)
    pub static REFUND_POLICY: Lazy<RefundPolicy> = Lazy::new(|| {
        env_non_empty("REFUND_POLICY")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    });
}

/// Telegram payments
pub mod payments {
    use super::{env_non_empty, Lazy};

    pub static PROVIDER_TOKEN: Lazy<Option<String>> = Lazy::new(|| env_non_empty("PAYMENT_PROVIDER_TOKEN"));

    pub static CURRENCY: Lazy<String> =
        Lazy::new(|| env_non_empty("PAYMENT_CURRENCY").unwrap_or_else(|| "UZS".to_string()));
}

/// HTTP control/reporting surface
pub mod web {
    use super::{env, env_non_empty, Lazy};

    pub static PORT: Lazy<u16> = Lazy::new(|| {
        env::var("WEB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080)
    });

    /// Bearer token required on /api/* when set
    pub static ADMIN_API_TOKEN: Lazy<Option<String>> = Lazy::new(|| env_non_empty("ADMIN_API_TOKEN"));
}

/// Estimated vendor costs (USD) used by analytics
pub mod analytics {
    pub const VISION_CALL_USD: f64 = 0.002;

    pub const TEXT_CALL_USD: f64 = 0.001;

    pub const IMAGE_GEN_USD: f64 = 0.04;
}

/// Network configuration
pub mod network {
    use super::Duration;

    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}
