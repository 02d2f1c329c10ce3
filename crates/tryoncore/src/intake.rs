//! Interprets flushed photo batches according to the chat's phase.
//!
//! `AWAITING_MODEL_IMAGE` batches are model candidates, `AWAITING_OUTFITS` and `COMPLETED`
//! batches are look items. Anything else is discarded with a hint for the user.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fluent_templates::fluent_bundle::FluentValue;

use crate::ai::{AiServices, ItemClassification};
use crate::core::config;
use crate::core::error::{AppError, AppResult, UpstreamError};
use crate::core::gateway::UpstreamGateway;
use crate::core::metrics;
use crate::core::types::{ImageData, ImageRef, Language};
use crate::i18n;
use crate::ingest::{FlushHandler, FlushedBatch};
use crate::keyboards;
use crate::messenger::{Markup, Messenger};
use crate::session::machine::SessionStateMachine;
use crate::session::types::{ChatSession, Gender, GenderTag, LookItem, ModelPhotoPolicy, Phase};
use crate::storage::analytics::{Analytics, ApiCallKind, FunnelStep};
use crate::storage::objects::{object_key, ObjectStore};

pub struct PhotoIntake {
    machine: Arc<SessionStateMachine>,
    ai: AiServices,
    vision: UpstreamGateway,
    store: Arc<dyn ObjectStore>,
    analytics: Analytics,
    messenger: Arc<dyn Messenger>,
    policy: ModelPhotoPolicy,
    max_photos: usize,
}

impl PhotoIntake {
    pub fn new(
        machine: Arc<SessionStateMachine>,
        ai: AiServices,
        vision: UpstreamGateway,
        store: Arc<dyn ObjectStore>,
        analytics: Analytics,
        messenger: Arc<dyn Messenger>,
        policy: ModelPhotoPolicy,
        max_photos: usize,
    ) -> Self {
        Self {
            machine,
            ai,
            vision,
            store,
            analytics,
            messenger,
            policy,
            max_photos,
        }
    }

    async fn say(&self, chat_id: i64, text: String, markup: Markup) -> AppResult<()> {
        self.messenger.send_text(chat_id, &text, markup).await.map(|_| ())
    }

    /// Sends a transient status line; a failed send only costs the user the hint.
    async fn progress(&self, chat_id: i64, lang: Language, key: &str) -> Option<i32> {
        match self.messenger.send_text(chat_id, &i18n::t(lang, key), Markup::None).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                log::warn!("Chat {}: could not send '{}' status: {}", chat_id, key, e);
                None
            }
        }
    }

    async fn clear_progress(&self, chat_id: i64, message_id: Option<i32>) {
        let Some(message_id) = message_id else {
            return;
        };
        if let Err(e) = self.messenger.delete_message(chat_id, message_id).await {
            log::warn!("Chat {}: could not delete status message {}: {}", chat_id, message_id, e);
        }
    }

    async fn accept_model_candidate(&self, session: &ChatSession, photo: ImageData) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();

        let key = object_key(chat_id, "models", &photo);
        let image_ref = self.store.put(&key, &photo).await?;

        let status = self.progress(chat_id, lang, "processing-model").await;
        let validator = self.ai.validator.clone();
        let policy = self.policy;
        let verdict = self
            .vision
            .call("validate", move || {
                let validator = validator.clone();
                let photo = photo.clone();
                async move { validator.validate(&photo, policy).await }
            })
            .await;
        self.clear_progress(chat_id, status).await;

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(UpstreamError::QuotaExceeded(msg)) => {
                log::warn!("Chat {}: model validation hit the quota: {}", chat_id, msg);
                self.analytics.record_validation(chat_id, false, Some("quota"));
                return self.say(chat_id, i18n::t(lang, "quota-retry-later"), Markup::None).await;
            }
            Err(e) => {
                self.analytics.record_validation(chat_id, false, Some(e.kind()));
                return Err(e.into());
            }
        };
        self.analytics.record_api_call(chat_id, ApiCallKind::Vision);
        self.analytics
            .record_validation(chat_id, verdict.valid, verdict.reason.as_deref());

        if !verdict.valid {
            log::info!("Chat {}: model photo rejected: {:?}", chat_id, verdict.reason);
            let text = match verdict.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                Some(reason) => i18n::tf(lang, "model-invalid", &[("reason", FluentValue::from(reason.to_string()))]),
                None => i18n::t(lang, "model-invalid-generic"),
            };
            return self.say(chat_id, text, Markup::None).await;
        }

        self.machine.accept_model(chat_id, image_ref, verdict.gender)?;
        self.analytics.record_funnel(chat_id, FunnelStep::ModelUploaded);
        log::info!("Chat {}: model photo accepted (gender {:?})", chat_id, verdict.gender);

        let text = i18n::tf(lang, "model-accepted", &[("max", FluentValue::from(self.max_photos as i64))]);
        self.say(chat_id, text, keyboards::main_menu(lang)).await
    }

    async fn accept_look_items(&self, session: &ChatSession, photos: Vec<ImageData>) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        let photos: Vec<ImageData> = photos.into_iter().take(self.max_photos).collect();

        let status = self.progress(chat_id, lang, "processing-items").await;
        let categorizer = self.ai.categorizer.clone();
        let batch = photos.clone();
        let classified = self
            .vision
            .call("categorize", move || {
                let categorizer = categorizer.clone();
                let batch = batch.clone();
                async move { categorizer.categorize(&batch).await }
            })
            .await;
        self.clear_progress(chat_id, status).await;

        let classified = match classified {
            Ok(items) => items,
            Err(UpstreamError::QuotaExceeded(msg)) => {
                log::warn!("Chat {}: categorization hit the quota: {}", chat_id, msg);
                return self.say(chat_id, i18n::t(lang, "quota-retry-later"), Markup::None).await;
            }
            Err(e) => return Err(e.into()),
        };
        self.analytics.record_api_call(chat_id, ApiCallKind::Vision);

        let classified: Vec<ItemClassification> = classified
            .into_iter()
            .filter(|c| {
                let in_range = c.image_index < photos.len();
                if !in_range {
                    log::warn!("Chat {}: categorizer referenced missing image {}", chat_id, c.image_index);
                }
                in_range
            })
            .collect();

        if classified.is_empty() {
            return self.say(chat_id, i18n::t(lang, "no-items-recognized"), Markup::None).await;
        }

        if let Some(item) = classified.iter().find(|c| c.is_prohibited) {
            log::info!("Chat {}: batch rejected, prohibited item '{}'", chat_id, item.description);
            self.analytics.record_error(Some(chat_id), "prohibited_item");
            return self.say(chat_id, i18n::t(lang, "item-prohibited"), Markup::None).await;
        }

        if let Some(item) = classified.iter().find(|c| !c.gender.compatible_with(session.model_gender)) {
            log::info!(
                "Chat {}: batch rejected, {} item for a {:?} model",
                chat_id,
                item.gender.as_str(),
                session.model_gender
            );
            let model = session.model_gender.map(|g| gender_label(lang, g)).unwrap_or_default();
            let item_gender = match item.gender {
                GenderTag::Male => gender_label(lang, Gender::Male),
                GenderTag::Female => gender_label(lang, Gender::Female),
                GenderTag::Unisex => GenderTag::Unisex.as_str().to_string(),
            };
            let text = i18n::tf(
                lang,
                "gender-mismatch",
                &[("model", FluentValue::from(model)), ("item", FluentValue::from(item_gender))],
            );
            return self.say(chat_id, text, Markup::None).await;
        }

        // Each source photo is uploaded once even when it yields several items.
        let mut uploaded: BTreeMap<usize, ImageRef> = BTreeMap::new();
        for c in &classified {
            if uploaded.contains_key(&c.image_index) {
                continue;
            }
            let photo = &photos[c.image_index];
            let key = object_key(chat_id, "items", photo);
            uploaded.insert(c.image_index, self.store.put(&key, photo).await?);
        }

        let items: Vec<LookItem> = classified
            .into_iter()
            .filter_map(|c| {
                let image_ref = uploaded.get(&c.image_index)?.clone();
                Some(LookItem {
                    id: uuid::Uuid::new_v4().to_string(),
                    category: c.category,
                    description: c.description,
                    image_ref,
                    contains_person: c.contains_person,
                    gender: c.gender,
                })
            })
            .collect();
        let labels: Vec<&str> = items.iter().map(|i| i.category.as_str()).collect();
        let labels = labels.join(", ");

        let session = self.machine.append_items(chat_id, items)?;
        self.analytics.record_funnel(chat_id, FunnelStep::OutfitUploaded);
        log::info!(
            "Chat {}: look now has {} item(s) after adding {}",
            chat_id,
            session.outfit_items.len(),
            labels
        );

        let text = i18n::tf(
            lang,
            "items-received",
            &[
                ("items", FluentValue::from(labels)),
                ("count", FluentValue::from(session.outfit_items.len() as i64)),
            ],
        );
        self.say(chat_id, text, keyboards::generate_button(lang)).await
    }
}

fn gender_label(lang: Language, gender: Gender) -> String {
    i18n::t(lang, &format!("gender-{}", gender.as_str()))
}

/// Chat-facing message for an error that escaped the interpreter
pub fn error_message(lang: Language, error: &AppError) -> String {
    if *config::DEV_MODE {
        return format!("⚠️ {}", error);
    }
    match error {
        AppError::Storage(_) => i18n::t(lang, "error-storage"),
        AppError::Upstream(UpstreamError::QuotaExceeded(_)) => i18n::t(lang, "quota-retry-later"),
        _ => i18n::t(lang, "error-generic"),
    }
}

#[async_trait]
impl FlushHandler for PhotoIntake {
    async fn on_flush(&self, chat_id: i64, batch: FlushedBatch) -> AppResult<()> {
        // Earlier flushes of this chat have finished, so the phase is current.
        let session = self.machine.get_required(chat_id)?;
        let lang = session.lang();

        let interpretation = match session.phase {
            Phase::AwaitingModelImage => "model",
            Phase::AwaitingOutfits | Phase::Completed => "outfit",
            _ => "ignored",
        };
        metrics::PHOTO_FLUSHES_TOTAL.with_label_values(&[interpretation]).inc();

        let FlushedBatch { mut photos, dropped } = batch;
        if dropped > 0 && interpretation != "ignored" {
            let text = i18n::tf(
                lang,
                "photos-ignored",
                &[
                    ("dropped", FluentValue::from(dropped as i64)),
                    ("max", FluentValue::from(self.max_photos as i64)),
                ],
            );
            self.say(chat_id, text, Markup::None).await?;
        }

        match session.phase {
            Phase::New | Phase::AwaitingLanguage => {
                self.say(chat_id, i18n::t(lang, "choose-language"), keyboards::language_picker())
                    .await
            }
            Phase::AwaitingModelImage => match photos.pop() {
                Some(candidate) => {
                    if !photos.is_empty() {
                        log::info!("Chat {}: {} extra photo(s) ignored, using the last one as model", chat_id, photos.len());
                    }
                    self.accept_model_candidate(&session, candidate).await
                }
                None => Ok(()),
            },
            Phase::AwaitingOutfits | Phase::Completed => self.accept_look_items(&session, photos).await,
            Phase::Generating => self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await,
            Phase::Survey(step) => {
                self.say(chat_id, i18n::t(lang, step.question_key()), keyboards::survey_question(lang, step))
                    .await
            }
        }
    }

    async fn on_flush_failed(&self, chat_id: i64, error: &AppError) {
        self.analytics.record_error(Some(chat_id), error.kind());
        let lang = match self.machine.get(chat_id) {
            Ok(Some(session)) => session.lang(),
            _ => Language::default(),
        };
        if let Err(e) = self.say(chat_id, error_message(lang, error), Markup::None).await {
            log::error!("Chat {}: could not report flush failure: {}", chat_id, e);
        }
    }
}
