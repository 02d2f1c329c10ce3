//! End-to-end chat flows through the router with fake collaborators
//!
//! Run with: cargo test -p tryoncore --test flow_test

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::fakes::item;
use common::{generated_image, TestEnv};
use pretty_assertions::assert_eq;
use tryoncore::ai::{ItemClassification, ValidationVerdict};
use tryoncore::i18n;
use tryoncore::session::{GenderTag, ItemCategory, Phase, SurveyStep};
use tryoncore::storage::get_connection;
use tryoncore::{EventKind, Language, Markup, PaymentNotice, UpstreamError};

const CHAT: i64 = 4242;

fn callback_data(markup: &Markup) -> Vec<String> {
    match markup {
        Markup::Inline(rows) => rows.iter().flatten().map(|b| b.data.clone()).collect(),
        _ => Vec::new(),
    }
}

fn set_credits(env: &TestEnv, chat_id: i64, credits: i64) {
    let conn = get_connection(&env.pool).expect("connection");
    conn.execute(
        "UPDATE sessions SET credits = ?1 WHERE chat_id = ?2",
        rusqlite::params![credits, chat_id],
    )
    .expect("update credits");
}

#[tokio::test(start_paused = true)]
async fn test_new_chat_to_first_generation() {
    let env = TestEnv::new();

    env.command(CHAT, "/start").await;
    assert_eq!(env.session(CHAT).phase, Phase::AwaitingLanguage);
    assert_eq!(env.balance(CHAT), 30);

    env.callback(CHAT, "lang_en").await;
    assert_eq!(env.session(CHAT).phase, Phase::AwaitingModelImage);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "ask-model-full-body")));

    env.photo(CHAT, "model-photo").await;
    env.settle().await;
    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert!(session.model_image.is_some());
    assert_eq!(session.model_image, session.original_model_image);

    env.photo(CHAT, "dress").await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    env.photo(CHAT, "jeans").await;
    env.settle().await;

    assert_eq!(env.ai.categorize_batches(), vec![2]);
    let session = env.session(CHAT);
    assert_eq!(session.outfit_items.len(), 2);
    assert_eq!(
        callback_data(&env.messenger.last_markup(CHAT).expect("markup")),
        vec!["generate_look".to_string()]
    );

    env.callback(CHAT, "generate_look").await;
    tokio::task::yield_now().await;
    assert_eq!(env.session(CHAT).phase, Phase::Generating);
    assert_eq!(env.balance(CHAT), 20);

    env.generations_done().await;
    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::Completed);
    assert_eq!(session.balance().expect("balance"), 20);
    assert!(session.outfit_items.is_empty());
    let model = session.model_image.expect("model");
    assert_ne!(Some(model.clone()), session.original_model_image);
    assert_eq!(env.store.image(&model), Some(generated_image()));

    let photos = env.messenger.photos(CHAT);
    assert_eq!(photos.len(), 1);
    assert!(photos[0].1.as_deref().unwrap_or_default().contains("20"));
}

#[tokio::test(start_paused = true)]
async fn test_photos_are_interpreted_by_phase() {
    let env = TestEnv::new();
    env.command(CHAT, "/start").await;

    env.photo(CHAT, "too-early").await;
    env.settle().await;
    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::Uz, "choose-language")));

    env.callback(CHAT, "lang_en").await;
    env.photo(CHAT, "model-photo").await;
    env.settle().await;
    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 1);
    assert!(env.ai.categorize_batches().is_empty());

    env.photo(CHAT, "shirt").await;
    env.settle().await;
    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.ai.categorize_batches(), vec![1]);
    assert_eq!(env.session(CHAT).outfit_items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_last_photo_of_a_burst_is_the_model_candidate() {
    let env = TestEnv::new();
    env.command(CHAT, "/start").await;
    env.callback(CHAT, "lang_en").await;

    env.photo(CHAT, "first").await;
    env.photo(CHAT, "second").await;
    env.settle().await;

    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 1);
    let model = env.session(CHAT).model_image.expect("model");
    assert_eq!(env.store.image(&model).map(|i| i.bytes.to_vec()), Some(b"second".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_item_photo_during_a_slow_model_check_is_kept() {
    let env = TestEnv::new();
    let others: Vec<i64> = (2..=9).collect();
    for &chat in others.iter().chain([CHAT].iter()) {
        env.command(chat, "/start").await;
        env.callback(chat, "lang_en").await;
    }

    // Other chats' model checks fill the vision queue ahead of this chat's.
    for &chat in &others {
        env.photo(chat, "model-photo").await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    env.photo(CHAT, "model-photo").await;
    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert_eq!(env.session(CHAT).phase, Phase::AwaitingModelImage);

    env.photo(CHAT, "dress").await;
    env.settle().await;
    env.settle().await;

    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert_eq!(session.outfit_items.len(), 1);
    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 9);
    assert_eq!(env.ai.categorize_batches(), vec![1]);
    assert!(!env
        .messenger
        .texts(CHAT)
        .contains(&i18n::t(Language::En, "error-generic")));
}

#[tokio::test(start_paused = true)]
async fn test_status_messages_are_removed_after_intake() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;

    assert!(env
        .messenger
        .sent_then_deleted(CHAT, &i18n::t(Language::En, "processing-model")));
    assert!(env
        .messenger
        .sent_then_deleted(CHAT, &i18n::t(Language::En, "processing-items")));
    assert!(!env
        .messenger
        .texts(CHAT)
        .contains(&i18n::t(Language::En, "complex-processing")));
}

#[tokio::test(start_paused = true)]
async fn test_worn_items_get_a_background_status_during_generation() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    env.ai.push_categorization(Ok(vec![ItemClassification {
        contains_person: true,
        ..item(0, ItemCategory::Top)
    }]));
    env.photo(CHAT, "street-style").await;
    env.settle().await;

    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;

    assert_eq!(env.ai.isolate_calls.load(Ordering::SeqCst), 1);
    assert!(env
        .messenger
        .sent_then_deleted(CHAT, &i18n::t(Language::En, "complex-processing")));
    assert!(env.messenger.sent_then_deleted(CHAT, &i18n::t(Language::En, "generating")));
    assert_eq!(env.messenger.photos(CHAT).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_photos_past_the_cap_are_reported() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    for n in 0..6 {
        env.photo(CHAT, &format!("item-{}", n)).await;
    }
    env.settle().await;

    assert_eq!(env.ai.categorize_batches(), vec![4]);
    assert_eq!(env.session(CHAT).outfit_items.len(), 4);
    let notice = env
        .messenger
        .texts(CHAT)
        .into_iter()
        .find(|t| t.starts_with("⚠️ Only"))
        .expect("ignored photos notice");
    assert!(notice.contains('2') && notice.contains('4'), "{}", notice);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_model_photo_keeps_asking() {
    let env = TestEnv::new();
    env.command(CHAT, "/start").await;
    env.callback(CHAT, "lang_en").await;
    env.ai.push_verdict(Ok(ValidationVerdict {
        valid: false,
        reason: Some("two people in the frame".to_string()),
        gender: None,
    }));

    env.photo(CHAT, "group-photo").await;
    env.settle().await;

    assert_eq!(env.session(CHAT).phase, Phase::AwaitingModelImage);
    let text = env.messenger.last_text(CHAT).expect("reply");
    assert!(text.contains("two people in the frame"), "{}", text);
}

#[tokio::test(start_paused = true)]
async fn test_validation_quota_asks_to_retry_later() {
    let env = TestEnv::new();
    env.command(CHAT, "/start").await;
    env.callback(CHAT, "lang_en").await;
    env.ai
        .push_verdict(Err(UpstreamError::QuotaExceeded("RESOURCE_EXHAUSTED".to_string())));

    env.photo(CHAT, "model-photo").await;
    env.settle().await;

    assert_eq!(env.ai.validate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.session(CHAT).phase, Phase::AwaitingModelImage);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "quota-retry-later")));
    assert!(env
        .messenger
        .sent_then_deleted(CHAT, &i18n::t(Language::En, "processing-model")));
}

#[tokio::test(start_paused = true)]
async fn test_model_upload_failure_is_reported() {
    let env = TestEnv::new();
    env.command(CHAT, "/start").await;
    env.callback(CHAT, "lang_en").await;
    env.store.fail_puts.store(true, Ordering::SeqCst);

    env.photo(CHAT, "model-photo").await;
    env.settle().await;

    assert_eq!(env.session(CHAT).phase, Phase::AwaitingModelImage);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "error-storage")));
    assert_eq!(env.buffer.pending_chats(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_download_failure_is_reported_immediately() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    env.photo(CHAT, "broken-file").await;

    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "error-download")));
    assert_eq!(env.buffer.pending_photos(CHAT), 0);
}

#[tokio::test(start_paused = true)]
async fn test_prohibited_item_discards_the_whole_batch() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    let stored_before = env.store.len();
    env.ai.push_categorization(Ok(vec![
        item(0, ItemCategory::Top),
        ItemClassification {
            is_prohibited: true,
            ..item(1, ItemCategory::Accessory)
        },
    ]));

    env.photo(CHAT, "top").await;
    env.photo(CHAT, "weapon").await;
    env.settle().await;

    let session = env.session(CHAT);
    assert!(session.outfit_items.is_empty());
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert_eq!(env.store.len(), stored_before);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "item-prohibited")));
}

#[tokio::test(start_paused = true)]
async fn test_gender_mismatch_discards_the_batch() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    env.ai.push_categorization(Ok(vec![ItemClassification {
        gender: GenderTag::Male,
        ..item(0, ItemCategory::Top)
    }]));

    env.photo(CHAT, "mens-shirt").await;
    env.settle().await;

    assert!(env.session(CHAT).outfit_items.is_empty());
    let text = env.messenger.last_text(CHAT).expect("reply");
    assert!(text.contains("female") && text.contains("male"), "{}", text);
}

#[tokio::test(start_paused = true)]
async fn test_one_photo_can_yield_several_items() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    let stored_before = env.store.len();
    env.ai
        .push_categorization(Ok(vec![item(0, ItemCategory::Top), item(0, ItemCategory::Bottom)]));

    env.photo(CHAT, "full-outfit").await;
    env.settle().await;

    let items = env.session(CHAT).outfit_items;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].image_ref, items[1].image_ref);
    assert_eq!(env.store.len(), stored_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_the_original_model() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    let original = env.session(CHAT).original_model_image.expect("original");

    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;
    assert_ne!(env.session(CHAT).model_image, Some(original.clone()));

    env.callback(CHAT, "reset_session").await;
    let session = env.session(CHAT);
    assert_eq!(session.model_image, Some(original));
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "reset-done")));
}

#[tokio::test(start_paused = true)]
async fn test_new_items_after_a_result_start_from_the_original_model() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    let original = env.session(CHAT).original_model_image.expect("original");
    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;

    env.photo(CHAT, "hat").await;
    env.settle().await;

    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert_eq!(session.model_image, Some(original));
    assert_eq!(session.outfit_items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_credit_floor_offers_packages_and_survey() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    set_credits(&env, CHAT, 5);

    env.callback(CHAT, "generate_look").await;
    env.generations_done().await;

    let session = env.session(CHAT);
    assert_eq!(session.balance().expect("balance"), 5);
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert!(env.ai.synthesize_calls().is_empty());
    let buttons = callback_data(&env.messenger.last_markup(CHAT).expect("markup"));
    assert!(buttons.contains(&"buy_pkg_100".to_string()));
    assert!(buttons.contains(&"survey_start".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_survey_pays_once() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;
    set_credits(&env, CHAT, 0);

    env.callback(CHAT, "survey_start").await;
    assert_eq!(env.session(CHAT).phase, Phase::Survey(SurveyStep::Q1));

    // Free text is only an answer at the last step
    env.text(CHAT, "great").await;
    assert_eq!(env.session(CHAT).phase, Phase::Survey(SurveyStep::Q1));

    env.callback(CHAT, "survey_q1_5").await;
    env.callback(CHAT, "survey_q2_4").await;
    env.callback(CHAT, "survey_q3_price").await;
    env.callback(CHAT, "survey_q4_3").await;
    assert_eq!(env.session(CHAT).phase, Phase::Survey(SurveyStep::Q5));
    env.text(CHAT, "about 20 000 so'm").await;

    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::AwaitingOutfits);
    assert_eq!(session.balance().expect("balance"), 30);

    set_credits(&env, CHAT, 0);
    env.callback(CHAT, "survey_start").await;
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "survey-already-done")));
    assert_eq!(env.balance(CHAT), 0);
}

#[tokio::test(start_paused = true)]
async fn test_survey_needs_low_credits() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    env.callback(CHAT, "survey_start").await;

    assert_eq!(env.session(CHAT).phase, Phase::AwaitingOutfits);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "survey-not-eligible")));
}

#[tokio::test(start_paused = true)]
async fn test_refinement_reaches_the_prompt() {
    let env = TestEnv::new();
    env.with_items(CHAT, 1).await;

    env.text(CHAT, "make the jacket red").await;
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "refinement-saved")));

    env.text(CHAT, "Generate").await;
    env.generations_done().await;

    let calls = env.ai.synthesize_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("make the jacket red"), "{}", calls[0].1);
    assert_eq!(env.session(CHAT).refinement, None);
}

#[tokio::test(start_paused = true)]
async fn test_payment_is_credited_once() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    let notice = PaymentNotice {
        payload: "pkg_100".to_string(),
        currency: "UZS".to_string(),
        total_amount: 1_000_000,
        charge_id: "tg_charge_1".to_string(),
    };

    env.send(CHAT, EventKind::Payment(notice.clone())).await;
    env.send(CHAT, EventKind::Payment(notice)).await;

    assert_eq!(env.balance(CHAT), 130);
    let report = env.analytics.report(tryoncore::storage::DateFilter::All).expect("report");
    assert_eq!(report.purchased_credits, 100);
    assert_eq!(report.revenue, 1_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_payment_with_wrong_amount_is_not_credited() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    env.send(
        CHAT,
        EventKind::Payment(PaymentNotice {
            payload: "pkg_400".to_string(),
            currency: "UZS".to_string(),
            total_amount: 100,
            charge_id: "tg_charge_2".to_string(),
        }),
    )
    .await;

    assert_eq!(env.balance(CHAT), 30);
    assert_eq!(env.messenger.last_text(CHAT), Some(i18n::t(Language::En, "payment-invalid-package")));
}

#[tokio::test(start_paused = true)]
async fn test_buy_button_sends_invoice() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    env.callback(CHAT, "buy_pkg_160").await;
    env.callback(CHAT, "buy_pkg_999").await;

    let invoices = env.messenger.invoices(CHAT);
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].payload, "pkg_160");
    assert_eq!(invoices[0].amount, 1_500_000);
    assert!(env.router.check_checkout(CHAT, "pkg_160", "UZS", 1_500_000).is_ok());
    assert!(env.router.check_checkout(CHAT, "pkg_160", "UZS", 1).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_monthly_grant_on_activity() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;
    {
        let conn = get_connection(&env.pool).expect("connection");
        conn.execute(
            "UPDATE sessions SET last_monthly_grant = '2000-01' WHERE chat_id = ?1",
            rusqlite::params![CHAT],
        )
        .expect("update");
    }

    env.command(CHAT, "/balance").await;
    env.command(CHAT, "/balance").await;

    assert_eq!(env.balance(CHAT), 60);
    let grants = env
        .messenger
        .texts(CHAT)
        .into_iter()
        .filter(|t| t.contains("🎁"))
        .count();
    assert_eq!(grants, 1);
}

#[tokio::test(start_paused = true)]
async fn test_admin_gift() {
    let env = TestEnv::new();
    env.onboard(CHAT).await;

    assert_eq!(env.router.gift(CHAT, 25).await.expect("gift"), Some(55));
    assert_eq!(env.router.gift(777, 25).await.expect("gift"), None);
    assert!(env.router.gift(CHAT, 0).await.is_err());
    assert!(env.messenger.last_text(CHAT).expect("notice").contains("55"));
}

#[tokio::test(start_paused = true)]
async fn test_change_model_asks_for_a_new_photo() {
    let env = TestEnv::new();
    env.with_items(CHAT, 2).await;

    env.text(CHAT, &i18n::t(Language::En, "menu-change-model")).await;

    let session = env.session(CHAT);
    assert_eq!(session.phase, Phase::AwaitingModelImage);
    assert!(session.model_image.is_none());
    assert!(session.outfit_items.is_empty());
}
