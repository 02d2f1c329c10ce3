//! One generation attempt from debit to settlement.
//!
//! Credits are debited before any vendor call. Whatever happens afterwards the session
//! leaves `GENERATING`: success stores the result as the working model, failure goes back
//! to `COMPLETED` with the refund chosen by the [`RefundPolicy`].

use std::sync::Arc;
use std::time::Instant;

use crate::ai::AiServices;
use crate::core::error::{AppError, AppResult};
use crate::core::gateway::UpstreamGateway;
use crate::core::metrics;
use crate::core::types::{ImageData, ImageRef};
use crate::generation::{prompt, FailureKind, RefundPolicy};
use crate::session::machine::{GenerationTicket, SessionStateMachine, StartRefusal};
use crate::session::types::LookItem;
use crate::storage::analytics::{Analytics, ApiCallKind, FunnelStep, GenerationRecord};
use crate::storage::objects::{object_key, ObjectStore};

#[derive(Debug)]
pub enum GenerationOutcome {
    Completed {
        image: ImageData,
        image_ref: ImageRef,
        balance: i64,
    },
    /// Nothing was debited
    Refused(StartRefusal),
    Failed {
        kind: FailureKind,
        refunded: i64,
        balance: Option<i64>,
        error: AppError,
    },
}

struct Produced {
    image: ImageData,
    image_ref: ImageRef,
}

pub struct GenerationPipeline {
    machine: Arc<SessionStateMachine>,
    ai: AiServices,
    vision: UpstreamGateway,
    aux: UpstreamGateway,
    store: Arc<dyn ObjectStore>,
    analytics: Analytics,
    refund_policy: RefundPolicy,
}

impl GenerationPipeline {
    pub fn new(
        machine: Arc<SessionStateMachine>,
        ai: AiServices,
        vision: UpstreamGateway,
        aux: UpstreamGateway,
        store: Arc<dyn ObjectStore>,
        analytics: Analytics,
        refund_policy: RefundPolicy,
    ) -> Self {
        Self {
            machine,
            ai,
            vision,
            aux,
            store,
            analytics,
            refund_policy,
        }
    }

    pub fn refund_policy(&self) -> RefundPolicy {
        self.refund_policy
    }

    /// Settles attempts a crashed process left in `GENERATING`, treating them as internal failures.
    pub fn recover_interrupted(&self) -> AppResult<Vec<i64>> {
        let refund = self
            .refund_policy
            .refund_for(FailureKind::Internal, self.machine.rules().gen_cost);
        let recovered = self.machine.recover_interrupted(refund)?;
        if !recovered.is_empty() {
            log::warn!(
                "Recovered {} interrupted generation(s), refunded {} each",
                recovered.len(),
                refund
            );
        }
        Ok(recovered)
    }

    /// Runs one attempt for `chat_id`.
    ///
    /// `Err` is returned only when the session itself could not be read or settled.
    pub async fn run(&self, chat_id: i64) -> AppResult<GenerationOutcome> {
        let ticket = match self.machine.start_generation(chat_id)? {
            Ok(ticket) => ticket,
            Err(refusal) => {
                log::info!("Chat {}: generation refused: {:?}", chat_id, refusal);
                metrics::record_generation("refused");
                return Ok(GenerationOutcome::Refused(refusal));
            }
        };
        self.analytics.record_funnel(chat_id, FunnelStep::GenerationRequested);

        let started = Instant::now();
        let mut prompt_used = None;
        let attempt = self.attempt(&ticket, &mut prompt_used).await;
        metrics::GENERATION_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        match attempt {
            Ok(produced) => {
                let session = match self.machine.complete_generation(chat_id, produced.image_ref.clone()) {
                    Ok(session) => session,
                    Err(e) => {
                        log::error!(
                            "Chat {}: result {} could not be saved, settling as failed: {}",
                            chat_id,
                            produced.image_ref,
                            e
                        );
                        return self.settle_failure(&ticket, prompt_used, e);
                    }
                };
                self.analytics.record_generation(&GenerationRecord {
                    chat_id,
                    item_count: ticket.items.len(),
                    prompt: prompt_used,
                    cost_credits: ticket.cost,
                    success: true,
                    error_kind: None,
                    refunded: 0,
                    result_ref: Some(produced.image_ref.to_string()),
                });
                self.analytics.record_funnel(chat_id, FunnelStep::GenerationCompleted);
                metrics::record_generation("success");
                log::info!(
                    "Chat {}: generation completed in {:.1}s -> {}",
                    chat_id,
                    started.elapsed().as_secs_f64(),
                    produced.image_ref
                );

                Ok(GenerationOutcome::Completed {
                    image: produced.image,
                    image_ref: produced.image_ref,
                    balance: session.credits.shown().unwrap_or(ticket.balance_after),
                })
            }
            Err(error) => self.settle_failure(&ticket, prompt_used, error),
        }
    }

    /// Moves the chat back to `COMPLETED` with the refund the policy grants for `error`.
    fn settle_failure(
        &self,
        ticket: &GenerationTicket,
        prompt_used: Option<String>,
        error: AppError,
    ) -> AppResult<GenerationOutcome> {
        let chat_id = ticket.chat_id;
        let kind = FailureKind::from_error(&error);
        let refund = self.refund_policy.refund_for(kind, ticket.cost);
        log::error!(
            "Chat {}: generation failed ({}), refunding {}: {}",
            chat_id,
            kind.as_str(),
            refund,
            error
        );

        let session = self.machine.fail_generation(chat_id, refund).map_err(|e| {
            log::error!(
                "Chat {}: could not settle the failed generation, it stays GENERATING until restart: {}",
                chat_id,
                e
            );
            e
        })?;
        self.analytics.record_generation(&GenerationRecord {
            chat_id,
            item_count: ticket.items.len(),
            prompt: prompt_used,
            cost_credits: ticket.cost,
            success: false,
            error_kind: Some(kind.as_str().to_string()),
            refunded: refund,
            result_ref: None,
        });
        self.analytics.record_error(Some(chat_id), kind.as_str());
        metrics::record_generation(match kind {
            FailureKind::Quota => "quota",
            FailureKind::Safety => "safety",
            _ => "failed",
        });

        Ok(GenerationOutcome::Failed {
            kind,
            refunded: refund,
            balance: session.credits.shown(),
            error,
        })
    }

    async fn attempt(&self, ticket: &GenerationTicket, prompt_used: &mut Option<String>) -> AppResult<Produced> {
        let chat_id = ticket.chat_id;
        let model = self.store.get(&ticket.model_image).await?;

        let mut cleaned = Vec::with_capacity(ticket.items.len());
        for item in &ticket.items {
            let original = self.store.get(&item.image_ref).await?;
            cleaned.push(self.clean_item(chat_id, item, original).await);
        }

        let composed = self.compose(chat_id, &ticket.items, ticket.refinement.as_deref()).await;
        let full_prompt = prompt::synthesis_prompt(&ticket.items, &composed);
        *prompt_used = Some(full_prompt.clone());

        let synthesizer = self.ai.synthesizer.clone();
        let image = self
            .vision
            .call("synthesize", move || {
                let synthesizer = synthesizer.clone();
                let model = model.clone();
                let items = cleaned.clone();
                let text = full_prompt.clone();
                async move { synthesizer.synthesize(&model, &items, &text).await }
            })
            .await?;
        self.analytics.record_api_call(chat_id, ApiCallKind::ImageGeneration);

        let key = object_key(chat_id, "results", &image);
        let image_ref = self.store.put(&key, &image).await?;
        Ok(Produced { image, image_ref })
    }

    /// Isolation or background removal; any failure keeps the original photo.
    async fn clean_item(&self, chat_id: i64, item: &LookItem, original: ImageData) -> ImageData {
        let result = if item.contains_person {
            let isolator = self.ai.isolator.clone();
            let image = original.clone();
            let description = item.description.clone();
            let isolated = self
                .vision
                .call("isolate", move || {
                    let isolator = isolator.clone();
                    let image = image.clone();
                    let description = description.clone();
                    async move { isolator.isolate(&image, &description).await }
                })
                .await;
            if isolated.is_ok() {
                self.analytics.record_api_call(chat_id, ApiCallKind::ImageGeneration);
            }
            isolated
        } else if let (true, Some(remover)) = (item.category.wants_background_removal(), self.ai.remover.clone()) {
            let image = original.clone();
            self.aux
                .call("remove_background", move || {
                    let remover = remover.clone();
                    let image = image.clone();
                    async move { remover.remove_background(&image).await }
                })
                .await
        } else {
            return original;
        };

        match result {
            Ok(image) => image,
            Err(e) => {
                log::warn!(
                    "Chat {}: cleanup of {} item '{}' failed, using the original photo: {}",
                    chat_id,
                    item.category,
                    item.description,
                    e
                );
                original
            }
        }
    }

    /// Composer output, or the local prompt when the composer fails
    async fn compose(&self, chat_id: i64, items: &[LookItem], refinement: Option<&str>) -> String {
        let composer = self.ai.composer.clone();
        let owned_items = items.to_vec();
        let owned_refinement = refinement.map(str::to_string);
        let composed = self
            .aux
            .call("compose_prompt", move || {
                let composer = composer.clone();
                let items = owned_items.clone();
                let refinement = owned_refinement.clone();
                async move { composer.compose(&items, refinement.as_deref()).await }
            })
            .await;

        match composed {
            Ok(text) => {
                self.analytics.record_api_call(chat_id, ApiCallKind::Text);
                text
            }
            Err(e) => {
                log::warn!("Chat {}: prompt composer failed, using local prompt: {}", chat_id, e);
                prompt::local_prompt(items, refinement)
            }
        }
    }
}
