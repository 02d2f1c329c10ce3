pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod types;

pub use dispatcher::{DispatchError, RateLimitedDispatcher};
pub use error::{AppError, AppResult, UpstreamError};
pub use gateway::UpstreamGateway;
pub use retry::{FailureClass, RetryError, RetryPolicy, Retryable};
pub use types::{ImageData, ImageRef, Language};
