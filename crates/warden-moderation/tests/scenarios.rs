use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use warden_db::Database;
use warden_db::models::{BanRow, UserRow};
use warden_moderation::notify::RecordingNotifier;
use warden_moderation::rules::RuleInput;
use warden_moderation::sqlite::fmt_ts;
use warden_moderation::{Moderation, ModerationConfig, ModerationError};
use warden_types::events::ModerationEvent;
use warden_types::models::{Action, AppealDecision, AppealStatus, Message, QueueStatus, Severity, UserStatus};

struct Harness {
    db: Arc<Database>,
    moderation: Moderation,
    notifier: Arc<RecordingNotifier>,
    admin: Uuid,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let moderation = Moderation::with_sqlite(db.clone(), &ModerationConfig::default(), notifier.clone());
    let admin = add_user(&db, "ADMIN", UserStatus::Active);
    Harness {
        db,
        moderation,
        notifier,
        admin,
    }
}

fn add_user(db: &Database, role: &str, status: UserStatus) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(&UserRow {
        id: id.to_string(),
        username: format!("user-{}", id.simple()),
        role: role.into(),
        status: status.as_str().into(),
        created_at: fmt_ts(Utc::now()),
    })
    .unwrap();
    id
}

fn message(content: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        section_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        content: content.into(),
        created_at: Utc::now(),
    }
}

async fn add_rule(h: &Harness, pattern: &str, category: &str, action: Action) -> Uuid {
    h.moderation
        .service
        .rules()
        .upsert_rule(RuleInput {
            pattern: pattern.into(),
            category: category.into(),
            severity: Severity::Medium,
            action,
            created_by: h.admin,
            metadata: None,
            enabled: true,
        })
        .await
        .unwrap()
        .id
}

/// A banned user with one active ban, as a resolved BAN_AUTHOR item would leave them.
fn banned_user(h: &Harness) -> Uuid {
    let user = add_user(&h.db, "USER", UserStatus::Banned);
    h.db.insert_ban(&BanRow {
        id: Uuid::new_v4().to_string(),
        user_id: user.to_string(),
        issued_by: h.admin.to_string(),
        reason: "spam".into(),
        custom_reason: None,
        thread_id: None,
        is_active: true,
        expires_at: None,
        created_at: fmt_ts(Utc::now()),
    })
    .unwrap();
    user
}

#[tokio::test]
async fn scenario_a_block_rule_blocks() {
    let h = harness();
    let rule_id = add_rule(&h, r"\bspam\b", "spam", Action::Block).await;

    let msg = message("buy spam now");
    let outcome = h.moderation.service.moderate(msg.clone()).await.unwrap();

    assert_eq!(outcome.verdict.action, Action::Block);
    assert!(outcome.verdict.matched_rule_ids.contains(&rule_id));
    assert!(!outcome.published);
    assert!(h.db.get_message(&msg.id.to_string()).unwrap().is_none());
}

#[tokio::test]
async fn scenario_b_no_match_allows() {
    let h = harness();
    add_rule(&h, r"\bspam\b", "spam", Action::Block).await;

    let outcome = h.moderation.service.moderate(message("hello world")).await.unwrap();
    assert_eq!(outcome.verdict.action, Action::Allow);
    assert_eq!(outcome.verdict.confidence, 0.0);
    assert!(outcome.verdict.matched_rule_ids.is_empty());
    assert!(outcome.published);
    assert!(outcome.queue_item.is_none());
}

#[tokio::test]
async fn scenario_c_flag_posts_and_queues() {
    let h = harness();
    add_rule(&h, "limited offer", "ads", Action::Flag).await;

    let msg = message("limited offer, click here");
    let outcome = h.moderation.service.moderate(msg.clone()).await.unwrap();

    assert_eq!(outcome.verdict.action, Action::Flag);
    assert!(outcome.published);
    assert!(h.db.get_message(&msg.id.to_string()).unwrap().is_some());

    let queued = h
        .moderation
        .service
        .queue()
        .get_queue(Some(QueueStatus::Queued))
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].message_id, msg.id);
}

#[tokio::test]
async fn scenario_d_and_e_appeal_then_approve() {
    let h = harness();
    let user = banned_user(&h);
    let appeals = &h.moderation.appeals;

    let err = appeals
        .submit_appeal(user, Uuid::new_v4(), "123456789")
        .await
        .unwrap_err();
    assert!(matches!(err, ModerationError::Validation(_)));

    let appeal = appeals
        .submit_appeal(user, Uuid::new_v4(), "123456789012")
        .await
        .unwrap();
    assert_eq!(appeal.status, AppealStatus::Pending);

    let reviewed = appeals
        .review_appeal(appeal.id, h.admin, AppealDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(reviewed.status, AppealStatus::Approved);

    let status = appeals.user(user).await.unwrap().status;
    let bans = h.db.list_bans(&user.to_string()).unwrap();
    let any_active = bans.iter().any(|b| b.is_active);
    assert_eq!((status, any_active), (UserStatus::Active, false));

    assert!(matches!(
        h.notifier.events().as_slice(),
        [ModerationEvent::AppealResolved {
            status: AppealStatus::Approved,
            ..
        }]
    ));
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let h = harness();
    add_rule(&h, "suspicious", "review", Action::Flag).await;
    let outcome = h.moderation.service.moderate(message("suspicious link")).await.unwrap();
    let item = outcome.queue_item.unwrap();

    let queue = h.moderation.service.queue().clone();
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move { queue.claim(item.id, Uuid::new_v4()).await }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(ModerationError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((winners, conflicts), (1, 7));
}

#[tokio::test]
async fn racing_appeals_leave_one_pending() {
    let h = harness();
    let user = banned_user(&h);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let appeals = h.moderation.appeals.clone();
        tasks.push(tokio::spawn(async move {
            appeals
                .submit_appeal(user, Uuid::new_v4(), "please review my ban")
                .await
        }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(ModerationError::DuplicateAppeal) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);

    let pending = h
        .moderation
        .appeals
        .list_appeals(Some(AppealStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn rule_edits_apply_to_the_next_evaluation() {
    let h = harness();
    let rules = h.moderation.service.rules();

    let first = h.moderation.service.evaluate(&message("free crypto")).await;
    assert_eq!(first.action, Action::Allow);

    let id = add_rule(&h, "crypto", "scam", Action::Block).await;
    let second = h.moderation.service.evaluate(&message("free crypto")).await;
    assert_eq!(second.action, Action::Block);

    rules.delete_rule(id).await.unwrap();
    let third = h.moderation.service.evaluate(&message("free crypto")).await;
    assert_eq!(third.action, Action::Allow);
}

#[tokio::test]
async fn resolving_with_a_ban_feeds_the_appeal_path() {
    let h = harness();
    add_rule(&h, "scam", "scam", Action::Flag).await;
    let author = add_user(&h.db, "USER", UserStatus::Active);
    let mut msg = message("scam link");
    msg.author_id = author;

    let item = h
        .moderation
        .service
        .moderate(msg)
        .await
        .unwrap()
        .queue_item
        .unwrap();

    let queue = h.moderation.service.queue();
    queue.claim(item.id, h.admin).await.unwrap();
    queue
        .resolve(
            item.id,
            h.admin,
            serde_json::from_value(serde_json::json!({ "outcome": "BAN_AUTHOR" })).unwrap(),
        )
        .await
        .unwrap();

    let appeal = h
        .moderation
        .appeals
        .submit_appeal(author, item.message_id, "that link was legitimate")
        .await
        .unwrap();
    assert_eq!(appeal.message_id, item.message_id);
}
