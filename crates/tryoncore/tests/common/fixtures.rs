//! Test fixtures
//!
//! [`TestEnv`] wires the real router, intake, buffer, state machine and pipeline to a temp
//! SQLite database, scripted AI fakes, an in-memory object store and a recording messenger.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tryoncore::core::{RateLimitedDispatcher, RetryPolicy, UpstreamGateway};
use tryoncore::generation::RefundPolicy;
use tryoncore::session::{ChatSession, CreditRules, ModelPhotoPolicy};
use tryoncore::{
    create_pool, Analytics, BufferSettings, DbPool, EventKind, GenerationPipeline, InboundEvent, PhotoIngestBuffer,
    PhotoIntake, Router, RouterDeps, SessionStateMachine, UserMeta,
};

use super::{FakeAi, MemoryStore, RecordingMessenger};

pub const DEBOUNCE: Duration = Duration::from_millis(3000);

pub struct TestEnv {
    _dir: TempDir,
    pub pool: Arc<DbPool>,
    pub machine: Arc<SessionStateMachine>,
    pub ai: Arc<FakeAi>,
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub analytics: Analytics,
    pub buffer: PhotoIngestBuffer,
    pub pipeline: Arc<GenerationPipeline>,
    pub router: Router,
}

impl TestEnv {
    /// Must be called inside a tokio runtime (the dispatchers spawn workers).
    pub fn new() -> Self {
        Self::with_refund_policy(RefundPolicy::SystemFaults)
    }

    pub fn with_refund_policy(refund_policy: RefundPolicy) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("tryon.sqlite");
        let pool = Arc::new(create_pool(db_path.to_str().expect("utf8 path")).expect("pool"));

        let machine = Arc::new(SessionStateMachine::new(pool.clone(), CreditRules::default()));
        let ai = FakeAi::new();
        let store = MemoryStore::new();
        let messenger = RecordingMessenger::new();
        let analytics = Analytics::new(pool.clone());

        let retry = RetryPolicy::new().initial_delay(Duration::from_millis(100));
        let vision = UpstreamGateway::new(
            RateLimitedDispatcher::new("vision-test", Duration::from_millis(500)),
            retry.clone(),
        );
        let aux = UpstreamGateway::new(RateLimitedDispatcher::new("aux-test", Duration::from_millis(100)), retry);

        let settings = BufferSettings {
            debounce: DEBOUNCE,
            max_photos: 4,
            max_pending_chats: 100,
        };
        let intake = Arc::new(PhotoIntake::new(
            machine.clone(),
            ai.services(),
            vision.clone(),
            store.clone(),
            analytics.clone(),
            messenger.clone(),
            ModelPhotoPolicy::FullBody,
            settings.max_photos,
        ));
        let buffer = PhotoIngestBuffer::new(intake, settings);

        let pipeline = Arc::new(GenerationPipeline::new(
            machine.clone(),
            ai.services(),
            vision,
            aux,
            store.clone(),
            analytics.clone(),
            refund_policy,
        ));

        let router = Router::new(RouterDeps {
            machine: machine.clone(),
            pipeline: pipeline.clone(),
            buffer: buffer.clone(),
            analytics: analytics.clone(),
            messenger: messenger.clone(),
            policy: ModelPhotoPolicy::FullBody,
            currency: "UZS".to_string(),
            payments_enabled: true,
        });

        Self {
            _dir: dir,
            pool,
            machine,
            ai,
            store,
            messenger,
            analytics,
            buffer,
            pipeline,
            router,
        }
    }

    pub async fn send(&self, chat_id: i64, kind: EventKind) {
        let event = InboundEvent {
            chat_id,
            user: UserMeta {
                username: Some(format!("user{}", chat_id)),
                first_name: Some("Test".to_string()),
                language_code: Some("en".to_string()),
            },
            kind,
        };
        self.router.handle(event).await;
    }

    pub async fn command(&self, chat_id: i64, text: &str) {
        let command = tryoncore::BotCommand::parse(text).expect("known command");
        self.send(chat_id, EventKind::Command(command)).await;
    }

    pub async fn text(&self, chat_id: i64, text: &str) {
        self.send(chat_id, EventKind::Text(text.to_string())).await;
    }

    pub async fn callback(&self, chat_id: i64, data: &str) {
        self.send(chat_id, EventKind::Callback { data: data.to_string() }).await;
    }

    pub async fn photo(&self, chat_id: i64, file_id: &str) {
        self.send(
            chat_id,
            EventKind::Photo {
                file_id: file_id.to_string(),
            },
        )
        .await;
    }

    /// Lets debounce timers fire and their flushes finish
    pub async fn settle(&self) {
        tokio::time::sleep(DEBOUNCE * 4).await;
    }

    /// Waits for spawned generations to settle
    pub async fn generations_done(&self) {
        self.router.wait_idle().await;
    }

    /// New chat through language choice and an accepted model photo
    pub async fn onboard(&self, chat_id: i64) {
        self.command(chat_id, "/start").await;
        self.callback(chat_id, "lang_en").await;
        self.photo(chat_id, "model-photo").await;
        self.settle().await;
    }

    /// Onboarded chat with `count` look items
    pub async fn with_items(&self, chat_id: i64, count: usize) {
        self.onboard(chat_id).await;
        for i in 0..count {
            self.photo(chat_id, &format!("item-{}", i)).await;
        }
        self.settle().await;
    }

    pub fn session(&self, chat_id: i64) -> ChatSession {
        self.machine.get_required(chat_id).expect("session")
    }

    pub fn balance(&self, chat_id: i64) -> i64 {
        self.session(chat_id).balance().expect("valid balance")
    }
}
