//! Scriptable AI collaborators and an in-memory object store

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tryoncore::ai::{
    AiServices, BackgroundRemover, GarmentIsolator, ImageSynthesizer, ItemCategorizer, ItemClassification,
    ModelValidator, PromptComposer, ValidationVerdict,
};
use tryoncore::session::{Gender, GenderTag, ItemCategory, LookItem, ModelPhotoPolicy};
use tryoncore::storage::ObjectStore;
use tryoncore::{AppError, AppResult, ImageData, ImageRef, UpstreamError};

pub fn generated_image() -> ImageData {
    ImageData::new(b"generated look".to_vec(), "image/png")
}

pub fn item(index: usize, category: ItemCategory) -> ItemClassification {
    ItemClassification {
        image_index: index,
        category,
        description: format!("{} #{}", category.as_str(), index),
        is_prohibited: false,
        gender: GenderTag::Unisex,
        contains_person: false,
    }
}

/// Every capability in one struct; scripted answers are consumed in order, then defaults apply.
#[derive(Default)]
pub struct FakeAi {
    pub verdicts: Mutex<VecDeque<Result<ValidationVerdict, UpstreamError>>>,
    pub categorizations: Mutex<VecDeque<Result<Vec<ItemClassification>, UpstreamError>>>,
    pub syntheses: Mutex<VecDeque<Result<ImageData, UpstreamError>>>,
    pub isolation_fails: AtomicBool,
    pub composer_fails: AtomicBool,

    pub validate_calls: AtomicUsize,
    pub isolate_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    /// Batch size of every categorize call
    pub categorize_batches: Mutex<Vec<usize>>,
    /// (item images, prompt) of every synthesize call
    pub synthesize_calls: Mutex<Vec<(Vec<ImageData>, String)>>,
}

impl FakeAi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn services(self: &Arc<Self>) -> AiServices {
        AiServices {
            validator: self.clone(),
            categorizer: self.clone(),
            isolator: self.clone(),
            remover: Some(self.clone()),
            composer: self.clone(),
            synthesizer: self.clone(),
        }
    }

    pub fn push_verdict(&self, verdict: Result<ValidationVerdict, UpstreamError>) {
        self.verdicts.lock().expect("lock").push_back(verdict);
    }

    pub fn push_categorization(&self, result: Result<Vec<ItemClassification>, UpstreamError>) {
        self.categorizations.lock().expect("lock").push_back(result);
    }

    pub fn push_synthesis(&self, result: Result<ImageData, UpstreamError>) {
        self.syntheses.lock().expect("lock").push_back(result);
    }

    pub fn categorize_batches(&self) -> Vec<usize> {
        self.categorize_batches.lock().expect("lock").clone()
    }

    pub fn synthesize_calls(&self) -> Vec<(Vec<ImageData>, String)> {
        self.synthesize_calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ModelValidator for FakeAi {
    async fn validate(&self, _image: &ImageData, _policy: ModelPhotoPolicy) -> Result<ValidationVerdict, UpstreamError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.verdicts.lock().expect("lock").pop_front();
        scripted.unwrap_or(Ok(ValidationVerdict {
            valid: true,
            reason: None,
            gender: Some(Gender::Female),
        }))
    }
}

#[async_trait]
impl ItemCategorizer for FakeAi {
    async fn categorize(&self, images: &[ImageData]) -> Result<Vec<ItemClassification>, UpstreamError> {
        self.categorize_batches.lock().expect("lock").push(images.len());
        let scripted = self.categorizations.lock().expect("lock").pop_front();
        scripted.unwrap_or_else(|| Ok((0..images.len()).map(|i| item(i, ItemCategory::Top)).collect()))
    }
}

#[async_trait]
impl GarmentIsolator for FakeAi {
    async fn isolate(&self, image: &ImageData, _description: &str) -> Result<ImageData, UpstreamError> {
        self.isolate_calls.fetch_add(1, Ordering::SeqCst);
        if self.isolation_fails.load(Ordering::SeqCst) {
            return Err(UpstreamError::Rejected {
                status: 400,
                message: "cannot isolate".to_string(),
            });
        }
        let mut bytes = b"isolated:".to_vec();
        bytes.extend_from_slice(&image.bytes);
        Ok(ImageData::new(bytes, "image/png"))
    }
}

#[async_trait]
impl BackgroundRemover for FakeAi {
    async fn remove_background(&self, image: &ImageData) -> Result<ImageData, UpstreamError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = b"cutout:".to_vec();
        bytes.extend_from_slice(&image.bytes);
        Ok(ImageData::new(bytes, "image/png"))
    }
}

#[async_trait]
impl PromptComposer for FakeAi {
    async fn compose(&self, items: &[LookItem], refinement: Option<&str>) -> Result<String, UpstreamError> {
        if self.composer_fails.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transport("composer down".to_string()));
        }
        let names: Vec<&str> = items.iter().map(|i| i.description.as_str()).collect();
        Ok(format!("COMPOSED: {} | {}", names.join(", "), refinement.unwrap_or("-")))
    }
}

#[async_trait]
impl ImageSynthesizer for FakeAi {
    async fn synthesize(&self, _model: &ImageData, items: &[ImageData], prompt: &str) -> Result<ImageData, UpstreamError> {
        self.synthesize_calls
            .lock()
            .expect("lock")
            .push((items.to_vec(), prompt.to_string()));
        let scripted = self.syntheses.lock().expect("lock").pop_front();
        scripted.unwrap_or_else(|| Ok(generated_image()))
    }
}

/// Object store kept in memory; uploads can be made to fail.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, ImageData>>,
    pub fail_puts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("lock").len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().expect("lock").keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn image(&self, image_ref: &ImageRef) -> Option<ImageData> {
        self.objects.lock().expect("lock").get(image_ref.as_str()).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, image: &ImageData) -> AppResult<ImageRef> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("bucket unavailable".to_string()));
        }
        self.objects
            .lock()
            .expect("lock")
            .insert(key.to_string(), image.clone());
        Ok(ImageRef::new(key))
    }

    async fn get(&self, image_ref: &ImageRef) -> AppResult<ImageData> {
        self.image(image_ref)
            .ok_or_else(|| AppError::Storage(format!("missing object {}", image_ref)))
    }
}
