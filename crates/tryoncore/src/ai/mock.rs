//! Offline collaborators for `USE_MOCK_AI=true` and local development.

use async_trait::async_trait;

use crate::ai::{
    BackgroundRemover, GarmentIsolator, ImageSynthesizer, ItemCategorizer, ItemClassification, ModelValidator,
    PromptComposer, ValidationVerdict,
};
use crate::core::error::UpstreamError;
use crate::core::types::ImageData;
use crate::generation::prompt;
use crate::session::types::{Gender, GenderTag, ItemCategory, LookItem, ModelPhotoPolicy};

const MOCK_CATEGORIES: [ItemCategory; 5] = [
    ItemCategory::Top,
    ItemCategory::Bottom,
    ItemCategory::Shoes,
    ItemCategory::Handbag,
    ItemCategory::Hat,
];

/// Accepts every model photo, cycles through categories and "generates" by echoing the model
#[derive(Debug, Default)]
pub struct MockAi;

#[async_trait]
impl ModelValidator for MockAi {
    async fn validate(&self, _image: &ImageData, _policy: ModelPhotoPolicy) -> Result<ValidationVerdict, UpstreamError> {
        log::debug!("[mock] validating model photo");
        Ok(ValidationVerdict {
            valid: true,
            reason: None,
            gender: Some(Gender::Female),
        })
    }
}

#[async_trait]
impl ItemCategorizer for MockAi {
    async fn categorize(&self, images: &[ImageData]) -> Result<Vec<ItemClassification>, UpstreamError> {
        log::debug!("[mock] categorizing {} image(s)", images.len());
        Ok((0..images.len())
            .map(|i| ItemClassification {
                image_index: i,
                category: MOCK_CATEGORIES[i % MOCK_CATEGORIES.len()],
                description: format!("mock item {}", i + 1),
                is_prohibited: false,
                gender: GenderTag::Unisex,
                contains_person: i % 2 == 0,
            })
            .collect())
    }
}

#[async_trait]
impl GarmentIsolator for MockAi {
    async fn isolate(&self, image: &ImageData, _description: &str) -> Result<ImageData, UpstreamError> {
        Ok(image.clone())
    }
}

#[async_trait]
impl BackgroundRemover for MockAi {
    async fn remove_background(&self, image: &ImageData) -> Result<ImageData, UpstreamError> {
        Ok(image.clone())
    }
}

#[async_trait]
impl PromptComposer for MockAi {
    async fn compose(&self, items: &[LookItem], refinement: Option<&str>) -> Result<String, UpstreamError> {
        Ok(prompt::local_prompt(items, refinement))
    }
}

#[async_trait]
impl ImageSynthesizer for MockAi {
    async fn synthesize(&self, model: &ImageData, _items: &[ImageData], _prompt: &str) -> Result<ImageData, UpstreamError> {
        log::debug!("[mock] returning the model photo as the generated image");
        Ok(model.clone())
    }
}

/// Composer that never leaves the process
#[derive(Debug, Default)]
pub struct LocalComposer;

#[async_trait]
impl PromptComposer for LocalComposer {
    async fn compose(&self, items: &[LookItem], refinement: Option<&str>) -> Result<String, UpstreamError> {
        Ok(prompt::local_prompt(items, refinement))
    }
}
