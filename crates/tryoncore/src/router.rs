//! Entry point for inbound chat events.
//!
//! The bot crate converts Telegram updates into [`InboundEvent`]s; everything after that
//! (session touch, monthly grant, commands, buttons, photos, payments) happens here.

use std::sync::Arc;

use fluent_templates::fluent_bundle::FluentValue;
use tokio_util::task::TaskTracker;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::types::Language;
use crate::generation::{FailureKind, GenerationOutcome, GenerationPipeline};
use crate::i18n;
use crate::ingest::{IngestError, PhotoIngestBuffer};
use crate::intake::error_message;
use crate::keyboards;
use crate::messenger::{Markup, Messenger};
use crate::payments::{self, CreditPackage, BUY_PREFIX};
use crate::session::machine::{
    current_month_key, ResetOutcome, SessionStateMachine, StartRefusal, SurveyProgress, SurveyStart, UserMeta,
};
use crate::session::survey::{AnswerKind, SurveyAnswer, SurveyStep};
use crate::session::types::{ChatSession, ModelPhotoPolicy, Phase};
use crate::storage::analytics::{Analytics, FunnelStep};
use crate::storage::{get_connection, surveys};

/// Slash commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Reset,
    Menu,
    Balance,
    Buy,
}

impl BotCommand {
    /// Parses `/start`, `/start@SomeBot` or `/start payload`
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next()?;
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(BotCommand::Start),
            "reset" => Some(BotCommand::Reset),
            "menu" => Some(BotCommand::Menu),
            "balance" => Some(BotCommand::Balance),
            "buy" => Some(BotCommand::Buy),
            _ => None,
        }
    }
}

/// Inline button actions, decoded from callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Language(Language),
    Generate,
    Reset,
    ChangeModel,
    /// Package id such as `pkg_100`
    Buy(String),
    SurveyStart,
    SurveyAnswer { step: SurveyStep, value: String },
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "generate_look" => return Some(CallbackAction::Generate),
            "reset_session" => return Some(CallbackAction::Reset),
            "change_model" => return Some(CallbackAction::ChangeModel),
            "survey_start" => return Some(CallbackAction::SurveyStart),
            _ => {}
        }
        if let Some(code) = data.strip_prefix("lang_") {
            return code.parse().ok().map(CallbackAction::Language);
        }
        if let Some(package) = data.strip_prefix(BUY_PREFIX) {
            return Some(CallbackAction::Buy(package.to_string()));
        }
        let rest = data.strip_prefix("survey_")?;
        let (step, value) = rest.split_once('_')?;
        Some(CallbackAction::SurveyAnswer {
            step: SurveyStep::from_id(step)?,
            value: value.to_string(),
        })
    }
}

/// A settled Telegram payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotice {
    pub payload: String,
    pub currency: String,
    /// Minor currency units
    pub total_amount: u32,
    pub charge_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command(BotCommand),
    Text(String),
    Photo { file_id: String },
    Callback { data: String },
    Payment(PaymentNotice),
}

#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub user: UserMeta,
    pub kind: EventKind,
}

/// Reply-keyboard menu entries, matched against their text in every language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Generate,
    Balance,
    Reset,
    ChangeModel,
    ChangeLanguage,
}

fn menu_action(text: &str) -> Option<MenuAction> {
    let text = text.trim();
    let entries = [
        ("generate-button", MenuAction::Generate),
        ("menu-balance", MenuAction::Balance),
        ("menu-reset", MenuAction::Reset),
        ("menu-change-model", MenuAction::ChangeModel),
        ("menu-change-language", MenuAction::ChangeLanguage),
    ];
    Language::ALL.iter().find_map(|&lang| {
        entries
            .iter()
            .find(|(key, _)| i18n::t(lang, key) == text)
            .map(|(_, action)| *action)
    })
}

fn ask_model_key(policy: ModelPhotoPolicy) -> &'static str {
    match policy {
        ModelPhotoPolicy::FullBody => "ask-model-full-body",
        ModelPhotoPolicy::WaistUp => "ask-model-waist-up",
    }
}

/// Collaborators and settings for [`Router`]
pub struct RouterDeps {
    pub machine: Arc<SessionStateMachine>,
    pub pipeline: Arc<GenerationPipeline>,
    pub buffer: PhotoIngestBuffer,
    pub analytics: Analytics,
    pub messenger: Arc<dyn Messenger>,
    pub policy: ModelPhotoPolicy,
    pub currency: String,
    pub payments_enabled: bool,
}

/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterDeps>,
    generations: TaskTracker,
}

impl Router {
    pub fn new(deps: RouterDeps) -> Self {
        Self {
            inner: Arc::new(deps),
            generations: TaskTracker::new(),
        }
    }

    pub fn machine(&self) -> &Arc<SessionStateMachine> {
        &self.inner.machine
    }

    pub fn analytics(&self) -> &Analytics {
        &self.inner.analytics
    }

    /// Handles one event; failures are logged and reported to the chat.
    pub async fn handle(&self, event: InboundEvent) {
        let chat_id = event.chat_id;
        if let Err(e) = self.route(event).await {
            log::error!("Chat {}: failed to handle event: {}", chat_id, e);
            self.report_error(chat_id, &e).await;
        }
    }

    /// Waits for generations started by earlier events to settle.
    pub async fn wait_idle(&self) {
        self.generations.close();
        self.generations.wait().await;
        self.generations.reopen();
    }

    async fn report_error(&self, chat_id: i64, error: &AppError) {
        self.inner.analytics.record_error(Some(chat_id), error.kind());
        let lang = match self.inner.machine.get(chat_id) {
            Ok(Some(session)) => session.lang(),
            _ => Language::default(),
        };
        if let Err(e) = self.say(chat_id, error_message(lang, error), Markup::None).await {
            log::error!("Chat {}: could not report error: {}", chat_id, e);
        }
    }

    async fn say(&self, chat_id: i64, text: String, markup: Markup) -> AppResult<()> {
        self.inner.messenger.send_text(chat_id, &text, markup).await.map(|_| ())
    }

    async fn route(&self, event: InboundEvent) -> AppResult<()> {
        let chat_id = event.chat_id;
        let (mut session, created) = self.inner.machine.touch(chat_id, &event.user)?;
        self.inner.analytics.touch_activity(chat_id);
        if created {
            self.inner.analytics.record_funnel(chat_id, FunnelStep::Start);
        }

        if let Some(balance) = self.inner.machine.grant_monthly_if_due(chat_id, &current_month_key())? {
            let text = i18n::tf(
                session.lang(),
                "monthly-grant",
                &[
                    ("amount", FluentValue::from(self.inner.machine.rules().monthly_grant)),
                    ("balance", FluentValue::from(balance)),
                ],
            );
            self.say(chat_id, text, Markup::None).await?;
            session = self.inner.machine.get_required(chat_id)?;
        }

        match event.kind {
            EventKind::Command(command) => self.on_command(&session, command).await,
            EventKind::Callback { data } => match CallbackAction::parse(&data) {
                Some(action) => self.on_callback(&session, action).await,
                None => {
                    log::warn!("Chat {}: unknown callback data '{}'", chat_id, data);
                    Ok(())
                }
            },
            EventKind::Text(text) => self.on_text(&session, &text).await,
            EventKind::Photo { file_id } => self.on_photo(&session, &file_id).await,
            EventKind::Payment(notice) => self.on_payment(&session, notice).await,
        }
    }

    async fn on_command(&self, session: &ChatSession, command: BotCommand) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        log::info!("Chat {}: command {:?}", chat_id, command);

        match command {
            BotCommand::Start | BotCommand::Reset => {
                if session.phase == Phase::Generating {
                    return self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await;
                }
                self.inner.buffer.discard(chat_id);
                self.inner.machine.begin_onboarding(chat_id)?;
                self.say(chat_id, i18n::t(lang, "choose-language"), keyboards::language_picker())
                    .await
            }
            BotCommand::Menu => self.say(chat_id, i18n::t(lang, "menu-shown"), keyboards::main_menu(lang)).await,
            BotCommand::Balance => self.show_balance(session).await,
            BotCommand::Buy => {
                let text = i18n::tf(lang, "balance", &[("credits", FluentValue::from(session.balance()?))]);
                self.say(chat_id, text, Markup::column(payments::package_buttons(lang)))
                    .await
            }
        }
    }

    async fn show_balance(&self, session: &ChatSession) -> AppResult<()> {
        let lang = session.lang();
        let text = i18n::tf(lang, "balance", &[("credits", FluentValue::from(session.balance()?))]);
        self.say(session.chat_id, text, Markup::None).await
    }

    async fn on_callback(&self, session: &ChatSession, action: CallbackAction) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        log::debug!("Chat {}: callback {:?}", chat_id, action);

        match action {
            CallbackAction::Language(chosen) => self.choose_language(chat_id, chosen).await,
            CallbackAction::Generate => self.generate(session).await,
            CallbackAction::Reset => self.soft_reset(session).await,
            CallbackAction::ChangeModel => self.change_model(session).await,
            CallbackAction::Buy(package_id) => {
                let Some(package) = CreditPackage::find(&package_id) else {
                    return self.say(chat_id, i18n::t(lang, "payment-invalid-package"), Markup::None).await;
                };
                if !self.inner.payments_enabled {
                    return self.say(chat_id, i18n::t(lang, "payment-unavailable"), Markup::None).await;
                }
                log::info!("Chat {}: sending invoice for {}", chat_id, package.id);
                self.inner
                    .messenger
                    .send_invoice(chat_id, &package.invoice(lang, &self.inner.currency))
                    .await
            }
            CallbackAction::SurveyStart => match self.inner.machine.start_survey(chat_id)? {
                SurveyStart::Started => self.ask_survey(chat_id, lang, SurveyStep::Q1).await,
                SurveyStart::AlreadyCompleted => {
                    self.say(chat_id, i18n::t(lang, "survey-already-done"), Markup::None).await
                }
                SurveyStart::NotEligible => self.say(chat_id, i18n::t(lang, "survey-not-eligible"), Markup::None).await,
            },
            CallbackAction::SurveyAnswer { step, value } => {
                let Phase::Survey(current) = session.phase else {
                    log::debug!("Chat {}: stale survey button {}", chat_id, step.id());
                    return Ok(());
                };
                if current != step {
                    return self.ask_survey(chat_id, lang, current).await;
                }
                self.answer_survey(session, step, &value).await
            }
        }
    }

    async fn choose_language(&self, chat_id: i64, chosen: Language) -> AppResult<()> {
        let session = self.inner.machine.select_language(chat_id, chosen)?;
        log::info!("Chat {}: language set to {}", chat_id, chosen);
        self.say(chat_id, i18n::t(chosen, "language-set"), keyboards::main_menu(chosen))
            .await?;

        match session.phase {
            Phase::AwaitingModelImage => {
                self.say(chat_id, i18n::t(chosen, ask_model_key(self.inner.policy)), Markup::None)
                    .await
            }
            Phase::AwaitingOutfits => self.say(chat_id, i18n::t(chosen, "send-outfits-prompt"), Markup::None).await,
            _ => Ok(()),
        }
    }

    async fn soft_reset(&self, session: &ChatSession) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        if session.phase == Phase::Generating {
            return self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await;
        }
        self.inner.buffer.discard(chat_id);
        match self.inner.machine.reset(chat_id)? {
            ResetOutcome::Restored(_) => self.say(chat_id, i18n::t(lang, "reset-done"), Markup::None).await,
            ResetOutcome::NeedsModel => self.say(chat_id, i18n::t(lang, "reset-need-model"), Markup::None).await,
        }
    }

    async fn change_model(&self, session: &ChatSession) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        if session.phase == Phase::Generating {
            return self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await;
        }
        self.inner.buffer.discard(chat_id);
        self.inner.machine.change_model(chat_id)?;
        self.say(chat_id, i18n::t(lang, ask_model_key(self.inner.policy)), Markup::None)
            .await
    }

    async fn ask_survey(&self, chat_id: i64, lang: Language, step: SurveyStep) -> AppResult<()> {
        self.say(chat_id, i18n::t(lang, step.question_key()), keyboards::survey_question(lang, step))
            .await
    }

    async fn answer_survey(&self, session: &ChatSession, step: SurveyStep, value: &str) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        let Some(answer) = SurveyAnswer::parse_for(step, value) else {
            self.say(chat_id, i18n::t(lang, "survey-invalid"), Markup::None).await?;
            return self.ask_survey(chat_id, lang, step).await;
        };

        match self.inner.machine.answer_survey(chat_id, answer)? {
            SurveyProgress::Next(next) => self.ask_survey(chat_id, lang, next).await,
            SurveyProgress::Invalid(again) => {
                self.say(chat_id, i18n::t(lang, "survey-invalid"), Markup::None).await?;
                self.ask_survey(chat_id, lang, again).await
            }
            SurveyProgress::Completed { reward, balance } => {
                log::info!("Chat {}: survey completed, +{} credits", chat_id, reward);
                let text = i18n::tf(
                    lang,
                    "survey-thanks",
                    &[("reward", FluentValue::from(reward)), ("balance", FluentValue::from(balance))],
                );
                self.say(chat_id, text, keyboards::main_menu(lang)).await
            }
            SurveyProgress::NotInSurvey => Ok(()),
        }
    }

    async fn on_text(&self, session: &ChatSession, text: &str) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();

        if let Some(action) = menu_action(text) {
            return match action {
                MenuAction::Generate => self.generate(session).await,
                MenuAction::Balance => self.show_balance(session).await,
                MenuAction::Reset => self.soft_reset(session).await,
                MenuAction::ChangeModel => self.change_model(session).await,
                MenuAction::ChangeLanguage => {
                    if session.phase == Phase::Generating {
                        return self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await;
                    }
                    self.inner.machine.request_language_change(chat_id)?;
                    self.say(chat_id, i18n::t(lang, "choose-language"), keyboards::language_picker())
                        .await
                }
            };
        }

        if let Phase::Survey(step) = session.phase {
            if step.answer_kind() == AnswerKind::FreeText {
                return self.answer_survey(session, step, text).await;
            }
            return self.ask_survey(chat_id, lang, step).await;
        }

        if i18n::is_generate_word(text) {
            return self.generate(session).await;
        }

        match session.phase {
            Phase::New | Phase::AwaitingLanguage => {
                self.say(chat_id, i18n::t(lang, "choose-language"), keyboards::language_picker())
                    .await
            }
            Phase::AwaitingModelImage => {
                self.say(chat_id, i18n::t(lang, ask_model_key(self.inner.policy)), Markup::None)
                    .await
            }
            Phase::Generating => self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await,
            Phase::AwaitingOutfits | Phase::Completed => {
                if self.inner.machine.set_refinement(chat_id, text)? {
                    log::info!("Chat {}: refinement text stored", chat_id);
                    self.say(chat_id, i18n::t(lang, "refinement-saved"), keyboards::generate_button(lang))
                        .await
                } else {
                    self.say(chat_id, i18n::t(lang, "send-outfits-prompt"), Markup::None).await
                }
            }
            Phase::Survey(_) => Ok(()),
        }
    }

    async fn on_photo(&self, session: &ChatSession, file_id: &str) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();

        let photo = match self.inner.messenger.download_photo(file_id).await {
            Ok(photo) => photo,
            Err(e) => {
                log::error!("Chat {}: photo download failed: {}", chat_id, e);
                self.inner.analytics.record_error(Some(chat_id), "download");
                return self.say(chat_id, i18n::t(lang, "error-download"), Markup::None).await;
            }
        };

        match self.inner.buffer.on_photo(chat_id, photo) {
            Ok(pending) => {
                log::debug!("Chat {}: {} photo(s) pending", chat_id, pending);
                Ok(())
            }
            Err(IngestError::BufferFull(limit)) => {
                log::warn!("Chat {}: photo dropped, {} chats already pending", chat_id, limit);
                self.say(chat_id, i18n::t(lang, "error-busy"), Markup::None).await
            }
        }
    }

    async fn on_payment(&self, session: &ChatSession, notice: PaymentNotice) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();

        let package = match payments::validate_payment(
            &notice.payload,
            &notice.currency,
            notice.total_amount,
            &self.inner.currency,
        ) {
            Ok(package) => package,
            Err(rejection) => {
                log::error!(
                    "Chat {}: settled payment {} does not match the catalogue: {:?}",
                    chat_id,
                    notice.charge_id,
                    rejection
                );
                self.inner.analytics.record_error(Some(chat_id), "payment_mismatch");
                return self.say(chat_id, i18n::t(lang, "payment-invalid-package"), Markup::None).await;
            }
        };

        let applied = self.inner.machine.apply_payment(
            chat_id,
            package.id,
            package.credits,
            i64::from(notice.total_amount),
            &notice.currency,
            &notice.charge_id,
        )?;
        let Some(balance) = applied else {
            return Ok(());
        };
        let text = i18n::tf(
            lang,
            "payment-thanks",
            &[
                ("credits", FluentValue::from(package.credits)),
                ("balance", FluentValue::from(balance)),
            ],
        );
        self.say(chat_id, text, keyboards::main_menu(lang)).await
    }

    /// Pre-checkout approval; the error is the localized text shown by Telegram.
    pub fn check_checkout(&self, user_id: i64, payload: &str, currency: &str, total_amount: u32) -> Result<(), String> {
        match payments::validate_payment(payload, currency, total_amount, &self.inner.currency) {
            Ok(_) => Ok(()),
            Err(rejection) => {
                log::warn!("User {}: pre-checkout rejected: {:?}", user_id, rejection);
                let lang = match self.inner.machine.get(user_id) {
                    Ok(Some(session)) => session.lang(),
                    _ => Language::default(),
                };
                Err(i18n::t(lang, "payment-invalid-package"))
            }
        }
    }

    /// Admin credit gift; `None` when the chat has no session.
    pub async fn gift(&self, chat_id: i64, amount: i64) -> AppResult<Option<i64>> {
        let Some(session) = self.inner.machine.get(chat_id)? else {
            return Ok(None);
        };
        let balance = self.inner.machine.add_credits(chat_id, amount, "gift")?;
        let text = i18n::tf(
            session.lang(),
            "gift-received",
            &[("amount", FluentValue::from(amount)), ("balance", FluentValue::from(balance))],
        );
        if let Err(e) = self.say(chat_id, text, Markup::None).await {
            log::warn!("Chat {}: gift applied but the notification failed: {}", chat_id, e);
        }
        Ok(Some(balance))
    }

    async fn generate(&self, session: &ChatSession) -> AppResult<()> {
        let chat_id = session.chat_id;
        let lang = session.lang();
        let cost = self.inner.machine.rules().gen_cost;

        if session.phase == Phase::Generating {
            return self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await;
        }
        if !session.phase.accepts_generation() {
            return self
                .explain_refusal(chat_id, lang, StartRefusal::WrongPhase(session.phase))
                .await;
        }
        let balance = session.balance()?;
        if balance < cost {
            return self.low_credits(chat_id, lang, balance, cost).await;
        }

        let isolates = session.outfit_items.iter().any(|item| item.contains_person);
        // The attempt outlives this event so the chat's next updates are not held up.
        let router = self.clone();
        self.generations.spawn(async move {
            if let Err(e) = router.run_generation(chat_id, lang, isolates).await {
                log::error!("Chat {}: generation could not be settled: {}", chat_id, e);
                router.report_error(chat_id, &e).await;
            }
        });
        Ok(())
    }

    /// `isolates` adds a status line for items worn by a person, which take an extra vision call each.
    async fn run_generation(&self, chat_id: i64, lang: Language, isolates: bool) -> AppResult<()> {
        let mut progress = Vec::with_capacity(2);
        let keys: &[&str] = if isolates {
            &["generating", "complex-processing"]
        } else {
            &["generating"]
        };
        for key in keys {
            match self.inner.messenger.send_text(chat_id, &i18n::t(lang, key), Markup::None).await {
                Ok(message_id) => progress.push(message_id),
                Err(e) => log::debug!("Chat {}: could not send '{}' status: {}", chat_id, key, e),
            }
        }
        let outcome = self.inner.pipeline.run(chat_id).await;
        for message_id in progress {
            if let Err(e) = self.inner.messenger.delete_message(chat_id, message_id).await {
                log::debug!("Chat {}: could not delete progress message: {}", chat_id, e);
            }
        }

        match outcome? {
            GenerationOutcome::Completed { image, balance, .. } => {
                let caption = i18n::tf(lang, "generation-done", &[("balance", FluentValue::from(balance))]);
                self.inner
                    .messenger
                    .send_photo(chat_id, &image, Some(&caption), keyboards::main_menu(lang))
                    .await
            }
            GenerationOutcome::Refused(refusal) => self.explain_refusal(chat_id, lang, refusal).await,
            GenerationOutcome::Failed {
                kind,
                refunded,
                balance,
                error,
            } => {
                let mut text = match kind {
                    FailureKind::Safety => i18n::t(lang, "generation-safety"),
                    FailureKind::Quota => i18n::t(lang, "generation-quota"),
                    FailureKind::Configuration => i18n::t(lang, "generation-config-error"),
                    _ => i18n::t(lang, "generation-failed"),
                };
                if refunded > 0 {
                    let refund = i18n::tf(
                        lang,
                        "credits-refunded",
                        &[
                            ("refunded", FluentValue::from(refunded)),
                            ("balance", FluentValue::from(balance.unwrap_or_default())),
                        ],
                    );
                    text = format!("{}\n{}", text, refund);
                }
                if *config::DEV_MODE {
                    text = format!("{}\n\n⚠️ {}", text, error);
                }
                self.say(chat_id, text, Markup::None).await
            }
        }
    }

    async fn explain_refusal(&self, chat_id: i64, lang: Language, refusal: StartRefusal) -> AppResult<()> {
        match refusal {
            StartRefusal::InsufficientCredits { balance, cost } => self.low_credits(chat_id, lang, balance, cost).await,
            StartRefusal::NoModel => self.say(chat_id, i18n::t(lang, "no-model"), Markup::None).await,
            StartRefusal::NoItems => self.say(chat_id, i18n::t(lang, "no-items"), Markup::None).await,
            StartRefusal::AlreadyGenerating => self.say(chat_id, i18n::t(lang, "please-wait"), Markup::None).await,
            StartRefusal::WrongPhase(Phase::New | Phase::AwaitingLanguage) => {
                self.say(chat_id, i18n::t(lang, "choose-language"), keyboards::language_picker())
                    .await
            }
            StartRefusal::WrongPhase(Phase::Survey(step)) => self.ask_survey(chat_id, lang, step).await,
            StartRefusal::WrongPhase(_) => self.say(chat_id, i18n::t(lang, "no-model"), Markup::None).await,
        }
    }

    async fn low_credits(&self, chat_id: i64, lang: Language, balance: i64, cost: i64) -> AppResult<()> {
        let offer_survey = {
            let conn = get_connection(self.inner.machine.pool())?;
            !surveys::has_completed_survey(&conn, chat_id)?
        };
        log::info!("Chat {}: low credits ({} < {})", chat_id, balance, cost);
        let text = i18n::tf(
            lang,
            "low-credits",
            &[("balance", FluentValue::from(balance)), ("cost", FluentValue::from(cost))],
        );
        self.say(chat_id, text, keyboards::low_credits(lang, offer_survey)).await
    }
}
