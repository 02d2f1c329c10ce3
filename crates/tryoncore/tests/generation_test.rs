//! Generation pipeline against scripted vendors
//!
//! Run with: cargo test -p tryoncore --test generation_test

mod common;

use std::sync::atomic::Ordering;

use common::fakes::item;
use common::TestEnv;
use pretty_assertions::assert_eq;
use tryoncore::ai::ItemClassification;
use tryoncore::generation::FailureKind;
use tryoncore::session::machine::StartRefusal;
use tryoncore::session::{ItemCategory, Phase};
use tryoncore::storage::{get_connection, DateFilter};
use tryoncore::{i18n, GenerationOutcome, Language, RefundPolicy, UpstreamError};

const CHAT: i64 = 9001;

#[tokio::test(start_paused = true)]
async fn test_cleanup_failure_keeps_the_original_photo() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    env.ai.push_categorization(Ok(vec![
        ItemClassification {
            contains_person: true,
            ..item(0, ItemCategory::Top)
        },
        item(1, ItemCategory::Shoes),
        item(2, ItemCategory::Bottom),
    ]));
    env.photo(CHAT, "worn-top").await;
    env.photo(CHAT, "sneakers").await;
    env.photo(CHAT, "trousers").await;
    env.settle().await;
    env.ai.isolation_fails.store(true, Ordering::SeqCst);

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(outcome, GenerationOutcome::Completed { balance: 20, .. }));
    // Rejections are not retried
    assert_eq!(env.ai.isolate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.ai.remove_calls.load(Ordering::SeqCst), 1);

    let calls = env.ai.synthesize_calls();
    let sent: Vec<Vec<u8>> = calls[0].0.iter().map(|i| i.bytes.to_vec()).collect();
    assert_eq!(
        sent,
        vec![b"worn-top".to_vec(), b"cutout:sneakers".to_vec(), b"trousers".to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_safety_rejection_keeps_the_debit() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.ai
        .push_synthesis(Err(UpstreamError::SafetyRejected("IMAGE_SAFETY".to_string())));

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    match outcome {
        GenerationOutcome::Failed { kind, refunded, balance, .. } => {
            assert_eq!(kind, FailureKind::Safety);
            assert_eq!(refunded, 0);
            assert_eq!(balance, Some(20));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::Completed);
    assert_eq!(session.outfit_items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_quota_failure_is_refunded_without_retry() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.ai
        .push_synthesis(Err(UpstreamError::QuotaExceeded("RESOURCE_EXHAUSTED".to_string())));

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed {
            kind: FailureKind::Quota,
            refunded: 10,
            balance: Some(30),
            ..
        }
    ));
    assert_eq!(env.ai.synthesize_calls().len(), 1);
    assert_eq!(env.balance(CHAT), 30);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.ai
        .push_synthesis(Err(UpstreamError::Transport("connection reset".to_string())));

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    assert_eq!(env.ai.synthesize_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_never_policy_keeps_credits_on_system_faults() {
    let env = TestEnv::with_refund_policy(RefundPolicy::Never);
    env.with_items(CHAT, 1).await;
    env.ai
        .push_synthesis(Err(UpstreamError::QuotaExceeded("429".to_string())));

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(outcome, GenerationOutcome::Failed { refunded: 0, .. }));
    assert_eq!(env.balance(CHAT), 20);
}

#[tokio::test(start_paused = true)]
async fn test_composer_failure_falls_back_to_local_prompt() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.text(CHAT, "roll up the sleeves").await;
    env.ai.composer_fails.store(true, Ordering::SeqCst);

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    let prompt = &env.ai.synthesize_calls()[0].1;
    assert!(!prompt.contains("COMPOSED"), "{}", prompt);
    assert!(prompt.contains("top #0"), "{}", prompt);
    assert!(prompt.contains("roll up the sleeves"), "{}", prompt);
}

#[tokio::test(start_paused = true)]
async fn test_result_upload_failure_is_refunded() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.store.fail_puts.store(true, Ordering::SeqCst);

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed {
            kind: FailureKind::Storage,
            refunded: 10,
            ..
        }
    ));
    assert_eq!(env.balance(CHAT), 30);
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_result_still_leaves_generating() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    {
        // Writing a result as the working model fails, any other session write succeeds.
        let conn = get_connection(&env.pool).expect("connection");
        conn.execute_batch(
            "CREATE TRIGGER reject_result_model BEFORE UPDATE ON sessions
             WHEN NEW.model_image LIKE '%/results/%'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .expect("trigger");
    }

    let outcome = env.pipeline.run(CHAT).await.expect("run");

    match outcome {
        GenerationOutcome::Failed { kind, refunded, balance, .. } => {
            assert_eq!(kind, FailureKind::Internal);
            assert_eq!(refunded, 10);
            assert_eq!(balance, Some(30));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::Completed);
    assert_eq!(session.model_image, session.original_model_image);
    assert_eq!(session.outfit_items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_refused_while_generating() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;

    env.callback(CHAT, "generate_look").await;
    tokio::task::yield_now().await;
    let outcome = env.pipeline.run(CHAT).await.expect("run");

    assert!(matches!(outcome, GenerationOutcome::Refused(StartRefusal::AlreadyGenerating)));
    env.generations_done().await;
    assert_eq!(env.balance(CHAT), 20);
    assert_eq!(env.messenger.photos(CHAT).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_generate_without_items_is_refused_for_free() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;

    assert_eq!(env.balance(CHAT), 30);
    assert!(env.ai.synthesize_calls().is_empty());
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "no-items")));
}

#[tokio::test(start_paused = true)]
async fn test_failed_generation_message_mentions_refund() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.ai
        .push_synthesis(Err(UpstreamError::InvalidResponse("no image part".to_string())));
    env.ai
        .push_synthesis(Err(UpstreamError::InvalidResponse("no image part".to_string())));

    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;

    let text = env.messenger.last_text(CHAT).expect("reply");
    assert!(text.contains("10"), "{}", text);
    assert_eq!(env.balance(CHAT), 30);
    assert_eq!(env.session(CHAT).phase, Phase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_recover_interrupted_generation() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    {
        let conn = get_connection(&env.pool).expect("connection");
        conn.execute(
            "UPDATE sessions SET phase = 'GENERATING', credits = 20 WHERE chat_id = ?1",
            rusqlite::params![CHAT],
        )
        .expect("update");
    }

    let recovered = env.pipeline.recover_interrupted().expect("recover");

    assert_eq!(recovered, vec![CHAT]);
    assert_eq!(env.session(CHAT).phase, Phase::Completed);
    assert_eq!(env.balance(CHAT), 30);
    assert!(env.pipeline.recover_interrupted().expect("recover").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_report_counts_generations() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    env.pipeline.run(CHAT).await.expect("run");

    env.photo(CHAT, "another").await;
    env.settle().await;
    env.ai
        .push_synthesis(Err(UpstreamError::QuotaExceeded("429".to_string())));
    env.pipeline.run(CHAT).await.expect("run");

    let report = env.analytics.report(DateFilter::All).expect("report");
    assert_eq!(report.generations.total, 2);
    assert_eq!(report.generations.success, 1);
    assert_eq!(report.generations.failed, 1);
    assert_eq!(report.generations.refunded_credits, 10);
    assert_eq!(report.funnel.get("generation_completed"), Some(&1));
    assert_eq!(report.new_users, 1);
    assert!(report.api_cost_usd > 0.0);
}
