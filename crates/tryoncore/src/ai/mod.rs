//! External AI collaborators.
//!
//! Each capability is a trait so the pipeline and intake can run against the vendor
//! clients, the offline mocks, or test fakes. Implementations never retry or pace
//! themselves; callers route them through an [`UpstreamGateway`](crate::core::UpstreamGateway).

pub mod gemini;
pub mod json;
pub mod mock;
pub mod openai;
pub mod pixlab;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config;
use crate::core::error::{AppResult, UpstreamError};
use crate::core::types::ImageData;
use crate::session::types::{Gender, GenderTag, ItemCategory, LookItem, ModelPhotoPolicy};

pub use gemini::GeminiClient;
pub use openai::OpenAiComposer;
pub use pixlab::PixLabRemover;

/// Answer of the model-photo validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reason: Option<String>,
    pub gender: Option<Gender>,
}

/// One garment found in a categorized batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemClassification {
    /// Index of the source image within the batch
    pub image_index: usize,
    pub category: ItemCategory,
    pub description: String,
    pub is_prohibited: bool,
    pub gender: GenderTag,
    pub contains_person: bool,
}

#[async_trait]
pub trait ModelValidator: Send + Sync {
    async fn validate(&self, image: &ImageData, policy: ModelPhotoPolicy) -> Result<ValidationVerdict, UpstreamError>;
}

#[async_trait]
pub trait ItemCategorizer: Send + Sync {
    /// Classifies a whole batch in one call; one image may yield several items.
    async fn categorize(&self, images: &[ImageData]) -> Result<Vec<ItemClassification>, UpstreamError>;
}

#[async_trait]
pub trait GarmentIsolator: Send + Sync {
    /// Removes the wearer and returns the garment on a neutral background
    async fn isolate(&self, image: &ImageData, description: &str) -> Result<ImageData, UpstreamError>;
}

#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image: &ImageData) -> Result<ImageData, UpstreamError>;
}

#[async_trait]
pub trait PromptComposer: Send + Sync {
    async fn compose(&self, items: &[LookItem], refinement: Option<&str>) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Dresses `model` in `items`; a vendor safety block surfaces as `SafetyRejected`.
    async fn synthesize(&self, model: &ImageData, items: &[ImageData], prompt: &str) -> Result<ImageData, UpstreamError>;
}

/// The set of collaborators the bot runs with
#[derive(Clone)]
pub struct AiServices {
    pub validator: Arc<dyn ModelValidator>,
    pub categorizer: Arc<dyn ItemCategorizer>,
    pub isolator: Arc<dyn GarmentIsolator>,
    /// Optional: items are used as photographed when absent
    pub remover: Option<Arc<dyn BackgroundRemover>>,
    pub composer: Arc<dyn PromptComposer>,
    pub synthesizer: Arc<dyn ImageSynthesizer>,
}

impl AiServices {
    /// Deterministic offline collaborators
    pub fn mock() -> Self {
        let mock = Arc::new(mock::MockAi::default());
        Self {
            validator: mock.clone(),
            categorizer: mock.clone(),
            isolator: mock.clone(),
            remover: Some(mock.clone()),
            composer: mock.clone(),
            synthesizer: mock,
        }
    }

    /// Vendor clients configured from the environment, or mocks when `USE_MOCK_AI` is set.
    ///
    /// A missing Gemini key is not an error here: every call then fails with
    /// `MissingCredential`, which the bot reports as a system error.
    pub fn from_env() -> AppResult<Self> {
        if *config::ai::USE_MOCK_AI {
            log::warn!("USE_MOCK_AI is set, using offline AI collaborators");
            return Ok(Self::mock());
        }

        let gemini = Arc::new(GeminiClient::new(
            &config::ai::GEMINI_BASE_URL,
            config::ai::GEMINI_API_KEY.clone(),
            &config::ai::GEMINI_VISION_MODEL,
            &config::ai::GEMINI_IMAGE_MODEL,
        )?);
        if config::ai::GEMINI_API_KEY.is_none() {
            log::warn!("GEMINI_API_KEY is not set; validation and generation will fail");
        }

        let composer: Arc<dyn PromptComposer> = match config::ai::OPENAI_API_KEY.clone() {
            Some(key) => Arc::new(OpenAiComposer::new(
                &config::ai::OPENAI_BASE_URL,
                key,
                &config::ai::OPENAI_MODEL,
            )?),
            None => {
                log::warn!("OPENAI_API_KEY is not set, prompts are composed locally");
                Arc::new(mock::LocalComposer)
            }
        };

        let remover: Option<Arc<dyn BackgroundRemover>> = match config::ai::PIXLAB_API_KEY.clone() {
            Some(key) => Some(Arc::new(PixLabRemover::new(&config::ai::PIXLAB_BASE_URL, key)?)),
            None => None,
        };

        Ok(Self {
            validator: gemini.clone(),
            categorizer: gemini.clone(),
            isolator: gemini.clone(),
            remover,
            composer,
            synthesizer: gemini,
        })
    }
}

pub(crate) fn http_client() -> AppResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config::ai::REQUEST_TIMEOUT_SECS))
        .build()?)
}

/// Turns a non-success vendor response into an [`UpstreamError`]
pub(crate) async fn vendor_failure(response: reqwest::Response) -> UpstreamError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<serde_json::Value>(&text).ok();
    let message = body
        .as_ref()
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}: {}", status, text.chars().take(300).collect::<String>()));
    UpstreamError::from_vendor(Some(status.as_u16()), body.as_ref(), &message)
}
