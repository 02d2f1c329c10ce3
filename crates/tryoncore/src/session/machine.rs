//! Authoritative per-chat state transitions.
//!
//! Every transition loads the session, mutates it and writes it back inside one
//! `BEGIN IMMEDIATE` transaction, so transitions for one chat never interleave
//! even when flush timers and update handlers run on different worker threads.

use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::types::{ImageRef, Language};
use crate::session::survey::{SurveyAnswer, SurveyStep};
use crate::session::types::{ChatSession, Gender, LookItem, Phase};
use crate::storage::{analytics, get_connection, sessions, surveys, DbPool};

/// Credit amounts used by the state machine
#[derive(Debug, Clone, Copy)]
pub struct CreditRules {
    pub initial: i64,
    pub gen_cost: i64,
    pub monthly_grant: i64,
    pub survey_reward: i64,
}

impl Default for CreditRules {
    fn default() -> Self {
        Self {
            initial: config::credits::INITIAL,
            gen_cost: config::credits::GEN_COST,
            monthly_grant: config::credits::MONTHLY_GRANT,
            survey_reward: config::credits::SURVEY_REWARD,
        }
    }
}

/// Telegram-side identity details refreshed on every event
#[derive(Debug, Clone, Default)]
pub struct UserMeta {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub language_code: Option<String>,
}

/// Everything a generation attempt needs, captured when credits are debited
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub chat_id: i64,
    pub lang: Language,
    pub cost: i64,
    pub balance_after: i64,
    pub model_image: ImageRef,
    pub items: Vec<LookItem>,
    pub refinement: Option<String>,
}

/// Why a generate trigger did not start a generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRefusal {
    InsufficientCredits { balance: i64, cost: i64 },
    NoModel,
    NoItems,
    AlreadyGenerating,
    WrongPhase(Phase),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Working model restored from the first accepted photo
    Restored(ImageRef),
    NeedsModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyStart {
    Started,
    AlreadyCompleted,
    /// Enough credits to generate, the survey is only offered on the low-credit path
    NotEligible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyProgress {
    Next(SurveyStep),
    /// The answer did not fit the step; ask again
    Invalid(SurveyStep),
    Completed { reward: i64, balance: i64 },
    NotInSurvey,
}

/// Month key used for the monthly grant, e.g. `2026-03`
pub fn current_month_key() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

fn ensure_not_generating(session: &ChatSession, action: &'static str) -> AppResult<()> {
    if session.phase == Phase::Generating {
        return Err(AppError::InvalidTransition {
            phase: session.phase.to_string(),
            action,
        });
    }
    Ok(())
}

pub struct SessionStateMachine {
    pool: Arc<DbPool>,
    rules: CreditRules,
}

impl SessionStateMachine {
    pub fn new(pool: Arc<DbPool>, rules: CreditRules) -> Self {
        Self { pool, rules }
    }

    pub fn rules(&self) -> CreditRules {
        self.rules
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    /// Runs `f` against the stored session inside one immediate transaction.
    ///
    /// Nothing is written when `f` fails.
    fn modify<T>(
        &self,
        chat_id: i64,
        f: impl FnOnce(&Connection, &mut ChatSession) -> AppResult<T>,
    ) -> AppResult<(ChatSession, T)> {
        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut session = sessions::load_session(&tx, chat_id)?.ok_or(AppError::SessionNotFound(chat_id))?;
        let before = session.phase;
        let out = f(&tx, &mut session)?;
        sessions::save_session(&tx, &session)?;
        tx.commit()?;

        if session.phase != before {
            log::info!("Chat {}: {} -> {}", chat_id, before, session.phase);
            metrics::SESSION_TRANSITIONS_TOTAL
                .with_label_values(&[session.phase.as_str()])
                .inc();
        }
        Ok((session, out))
    }

    pub fn get(&self, chat_id: i64) -> AppResult<Option<ChatSession>> {
        let conn = get_connection(&self.pool)?;
        sessions::load_session(&conn, chat_id)
    }

    pub fn get_required(&self, chat_id: i64) -> AppResult<ChatSession> {
        self.get(chat_id)?.ok_or(AppError::SessionNotFound(chat_id))
    }

    /// Gets or creates the session for `chat_id`; the flag is true for a new chat.
    ///
    /// New sessions start with the initial balance and the current month already granted.
    pub fn touch(&self, chat_id: i64, meta: &UserMeta) -> AppResult<(ChatSession, bool)> {
        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (session, created) = match sessions::load_session(&tx, chat_id)? {
            Some(mut session) => {
                let renamed = (meta.username.is_some() && session.username != meta.username)
                    || (meta.first_name.is_some() && session.first_name != meta.first_name);
                if renamed {
                    session.username = meta.username.clone().or(session.username);
                    session.first_name = meta.first_name.clone().or(session.first_name);
                    sessions::save_session(&tx, &session)?;
                }
                sessions::touch_last_active(&tx, chat_id)?;
                (session, false)
            }
            None => {
                let mut session = ChatSession::new(chat_id, self.rules.initial, current_month_key());
                session.username = meta.username.clone();
                session.first_name = meta.first_name.clone();
                sessions::insert_session(&tx, &session)?;
                log::info!("Created session for chat {} with {} credits", chat_id, self.rules.initial);
                (session, true)
            }
        };
        tx.commit()?;
        Ok((session, created))
    }

    /// `/start`: back to the language picker
    pub fn begin_onboarding(&self, chat_id: i64) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            ensure_not_generating(s, "start")?;
            s.survey = Default::default();
            s.phase = Phase::AwaitingLanguage;
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Records the chosen language and leaves onboarding when applicable.
    ///
    /// A chat that already has a model goes straight back to collecting outfits.
    pub fn select_language(&self, chat_id: i64, lang: Language) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            s.language = Some(lang);
            if matches!(s.phase, Phase::New | Phase::AwaitingLanguage) {
                s.phase = if s.model_image.is_some() {
                    Phase::AwaitingOutfits
                } else {
                    Phase::AwaitingModelImage
                };
            }
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Accepts a validated model photo
    pub fn accept_model(&self, chat_id: i64, image: ImageRef, gender: Option<Gender>) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            if s.phase != Phase::AwaitingModelImage {
                return Err(AppError::InvalidTransition {
                    phase: s.phase.to_string(),
                    action: "accept_model",
                });
            }
            s.model_image = Some(image.clone());
            s.original_model_image = Some(image);
            s.model_gender = gender;
            s.clear_look();
            s.phase = Phase::AwaitingOutfits;
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Appends categorized items. After a completed generation the next look starts
    /// again from the original model photo.
    pub fn append_items(&self, chat_id: i64, items: Vec<LookItem>) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            if !s.phase.accepts_outfits() {
                return Err(AppError::InvalidTransition {
                    phase: s.phase.to_string(),
                    action: "append_items",
                });
            }
            if s.phase == Phase::Completed {
                if let Some(original) = s.original_model_image.clone() {
                    s.model_image = Some(original);
                }
                s.phase = Phase::AwaitingOutfits;
            }
            s.outfit_items.extend(items);
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Stores free text to apply to the next generation; false when the phase does not take it.
    pub fn set_refinement(&self, chat_id: i64, text: &str) -> AppResult<bool> {
        self.modify(chat_id, |_, s| {
            if !s.phase.accepts_outfits() || s.outfit_items.is_empty() {
                return Ok(false);
            }
            let text: String = text.trim().chars().take(500).collect();
            s.refinement = (!text.is_empty()).then_some(text);
            Ok(true)
        })
        .map(|(_, stored)| stored)
    }

    /// Debits the generation cost and moves to `GENERATING`.
    ///
    /// A corrupt stored balance is an error, never coerced.
    pub fn start_generation(&self, chat_id: i64) -> AppResult<Result<GenerationTicket, StartRefusal>> {
        let cost = self.rules.gen_cost;
        let (_, outcome) = self.modify(chat_id, |_, s| {
            match s.phase {
                Phase::Generating => return Ok(Err(StartRefusal::AlreadyGenerating)),
                p if !p.accepts_generation() => return Ok(Err(StartRefusal::WrongPhase(p))),
                _ => {}
            }
            let Some(model_image) = s.model_image.clone() else {
                return Ok(Err(StartRefusal::NoModel));
            };
            if s.outfit_items.is_empty() {
                return Ok(Err(StartRefusal::NoItems));
            }

            let balance = s.balance()?;
            if balance < cost {
                return Ok(Err(StartRefusal::InsufficientCredits { balance, cost }));
            }
            let balance_after = balance.checked_sub(cost).filter(|b| *b >= 0).ok_or_else(|| {
                AppError::CorruptBalance {
                    chat_id,
                    raw: format!("{} - {}", balance, cost),
                }
            })?;
            s.credits = crate::session::types::CreditBalance::Valid(balance_after);
            s.phase = Phase::Generating;

            Ok(Ok(GenerationTicket {
                chat_id,
                lang: s.lang(),
                cost,
                balance_after,
                model_image,
                items: s.outfit_items.clone(),
                refinement: s.refinement.clone(),
            }))
        })?;

        if let Ok(ticket) = &outcome {
            metrics::CREDITS_DEBITED_TOTAL.inc_by(ticket.cost as f64);
            log::info!(
                "Chat {}: debited {} credits for generation ({} left, {} items)",
                chat_id,
                ticket.cost,
                ticket.balance_after,
                ticket.items.len()
            );
        }
        Ok(outcome)
    }

    /// Successful settlement: the result becomes the working model and the look is cleared.
    pub fn complete_generation(&self, chat_id: i64, result: ImageRef) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            if s.phase != Phase::Generating {
                return Err(AppError::InvalidTransition {
                    phase: s.phase.to_string(),
                    action: "complete_generation",
                });
            }
            s.model_image = Some(result);
            s.clear_look();
            s.phase = Phase::Completed;
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Failed settlement: back to `COMPLETED` so the user can retry, refunding `refund` credits.
    pub fn fail_generation(&self, chat_id: i64, refund: i64) -> AppResult<ChatSession> {
        self.modify(chat_id, |conn, s| {
            if s.phase != Phase::Generating {
                return Err(AppError::InvalidTransition {
                    phase: s.phase.to_string(),
                    action: "fail_generation",
                });
            }
            if refund > 0 {
                s.credit(refund)?;
                sessions::record_grant(conn, chat_id, "refund", refund)?;
            }
            s.phase = Phase::Completed;
            Ok(())
        })
        .map(|(s, _)| {
            if refund > 0 {
                metrics::CREDITS_REFUNDED_TOTAL.inc_by(refund as f64);
            }
            s
        })
    }

    /// Settles sessions a previous process left in `GENERATING`.
    pub fn recover_interrupted(&self, refund: i64) -> AppResult<Vec<i64>> {
        let conn = get_connection(&self.pool)?;
        let stuck = sessions::chats_in_phase(&conn, Phase::Generating)?;
        drop(conn);

        for chat_id in &stuck {
            log::warn!("Chat {} was left generating by a previous run, settling it", chat_id);
            self.fail_generation(*chat_id, refund)?;
        }
        Ok(stuck)
    }

    /// Soft reset: keeps the model when there is one, drops the look.
    pub fn reset(&self, chat_id: i64) -> AppResult<ResetOutcome> {
        self.modify(chat_id, |_, s| {
            ensure_not_generating(s, "reset")?;
            s.clear_look();
            s.survey = Default::default();
            match s.original_model_image.clone().or_else(|| s.model_image.clone()) {
                Some(original) => {
                    s.model_image = Some(original.clone());
                    s.phase = Phase::AwaitingOutfits;
                    Ok(ResetOutcome::Restored(original))
                }
                None => {
                    s.phase = Phase::AwaitingModelImage;
                    Ok(ResetOutcome::NeedsModel)
                }
            }
        })
        .map(|(_, outcome)| outcome)
    }

    /// Drops the model and the look and asks for a new model photo.
    pub fn change_model(&self, chat_id: i64) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            ensure_not_generating(s, "change_model")?;
            s.model_image = None;
            s.original_model_image = None;
            s.model_gender = None;
            s.clear_look();
            s.survey = Default::default();
            s.phase = Phase::AwaitingModelImage;
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Menu "change language": show the picker again
    pub fn request_language_change(&self, chat_id: i64) -> AppResult<ChatSession> {
        self.modify(chat_id, |_, s| {
            ensure_not_generating(s, "change_language")?;
            s.phase = Phase::AwaitingLanguage;
            Ok(())
        })
        .map(|(s, _)| s)
    }

    /// Grants the monthly credits once per month key; returns the new balance when granted.
    pub fn grant_monthly_if_due(&self, chat_id: i64, month_key: &str) -> AppResult<Option<i64>> {
        let amount = self.rules.monthly_grant;
        let (_, granted) = self.modify(chat_id, |conn, s| {
            if s.language.is_none() || s.last_monthly_grant.as_deref() == Some(month_key) {
                return Ok(None);
            }
            let balance = s.credit(amount)?;
            s.last_monthly_grant = Some(month_key.to_string());
            sessions::record_grant(conn, chat_id, "monthly", amount)?;
            Ok(Some(balance))
        })?;

        if let Some(balance) = granted {
            metrics::record_credits_granted("monthly", amount);
            log::info!("Chat {}: monthly grant of {} for {} (balance {})", chat_id, amount, month_key, balance);
        }
        Ok(granted)
    }

    /// Adds purchased or gifted credits; returns the new balance.
    pub fn add_credits(&self, chat_id: i64, amount: i64, reason: &str) -> AppResult<i64> {
        if amount <= 0 {
            return Err(AppError::Validation(format!("credit amount must be positive, got {}", amount)));
        }
        let (_, balance) = self.modify(chat_id, |conn, s| {
            let balance = s.credit(amount)?;
            sessions::record_grant(conn, chat_id, reason, amount)?;
            Ok(balance)
        })?;
        metrics::record_credits_granted(reason, amount);
        log::info!("Chat {}: +{} credits ({}), balance {}", chat_id, amount, reason, balance);
        Ok(balance)
    }

    /// Credits a settled payment exactly once per charge id.
    ///
    /// Returns `None` when the charge was already applied.
    pub fn apply_payment(
        &self,
        chat_id: i64,
        package_id: &str,
        credits: i64,
        amount: i64,
        currency: &str,
        charge_id: &str,
    ) -> AppResult<Option<i64>> {
        let (_, balance) = self.modify(chat_id, |conn, s| {
            if !analytics::insert_payment(conn, chat_id, package_id, credits, amount, currency, charge_id)? {
                return Ok(None);
            }
            let balance = s.credit(credits)?;
            sessions::record_grant(conn, chat_id, "payment", credits)?;
            Ok(Some(balance))
        })?;

        match balance {
            Some(balance) => {
                metrics::record_credits_granted("payment", credits);
                metrics::PAYMENTS_TOTAL.with_label_values(&[package_id]).inc();
                log::info!(
                    "Chat {}: payment {} for {} settled, +{} credits, balance {}",
                    chat_id,
                    charge_id,
                    package_id,
                    credits,
                    balance
                );
            }
            None => log::warn!("Chat {}: payment {} was already applied", chat_id, charge_id),
        }
        Ok(balance)
    }

    /// Enters the survey from the low-credit prompt
    pub fn start_survey(&self, chat_id: i64) -> AppResult<SurveyStart> {
        let cost = self.rules.gen_cost;
        self.modify(chat_id, |conn, s| {
            if surveys::has_completed_survey(conn, chat_id)? {
                return Ok(SurveyStart::AlreadyCompleted);
            }
            if s.balance()? >= cost || s.phase == Phase::Generating {
                return Ok(SurveyStart::NotEligible);
            }
            s.survey = Default::default();
            s.phase = Phase::Survey(SurveyStep::Q1);
            Ok(SurveyStart::Started)
        })
        .map(|(_, outcome)| outcome)
    }

    /// Records an answer and advances the linear walk; the last answer pays the reward.
    pub fn answer_survey(&self, chat_id: i64, answer: SurveyAnswer) -> AppResult<SurveyProgress> {
        let reward = self.rules.survey_reward;
        let (_, progress) = self.modify(chat_id, |conn, s| {
            let Phase::Survey(step) = s.phase else {
                return Ok(SurveyProgress::NotInSurvey);
            };
            if !s.survey.record(step, answer) {
                return Ok(SurveyProgress::Invalid(step));
            }
            if let Some(next) = step.next() {
                s.phase = Phase::Survey(next);
                return Ok(SurveyProgress::Next(next));
            }

            let Some(completed) = s.survey.complete() else {
                // An earlier answer went missing; start over.
                s.survey = Default::default();
                s.phase = Phase::Survey(SurveyStep::Q1);
                return Ok(SurveyProgress::Invalid(SurveyStep::Q1));
            };
            surveys::insert_survey_response(conn, chat_id, &completed, reward)?;
            let balance = s.credit(reward)?;
            sessions::record_grant(conn, chat_id, "survey", reward)?;
            s.survey = Default::default();
            s.phase = if s.model_image.is_some() {
                Phase::AwaitingOutfits
            } else {
                Phase::AwaitingModelImage
            };
            Ok(SurveyProgress::Completed { reward, balance })
        })?;

        if let SurveyProgress::Completed { reward, .. } = progress {
            metrics::record_credits_granted("survey", reward);
        }
        Ok(progress)
    }
}
