//! Token accounting against the in-memory store.

use std::sync::Arc;

use api_lib::adapters::MemoryAdapter;
use profiler_core::{
    accounting::{TokenAccountant, FREE_LIFETIME_TOKENS, UNLIMITED_BALANCE},
    domain::{UsageKind, UserRole},
    ports::{DatabaseService, PortError},
};
use uuid::Uuid;

async fn setup() -> (Arc<MemoryAdapter>, TokenAccountant) {
    let db = Arc::new(MemoryAdapter::new());
    let accountant = TokenAccountant::new(db.clone());
    (db, accountant)
}

#[tokio::test]
async fn free_session_near_the_cap_is_refused() {
    let (db, accountant) = setup().await;
    db.create_anonymous_session("anon-1", None, None).await.unwrap();
    assert!(db.compare_and_set_session_usage("anon-1", 0, 950).await.unwrap());

    let decision = accountant
        .check_free_user_limits("anon-1", 400, 100)
        .await
        .unwrap();
    assert!(!decision.can_proceed);
    assert_eq!(decision.tokens_used, 950);
    assert!(decision.message.is_some());

    let small = accountant.check_free_user_limits("anon-1", 30, 20).await.unwrap();
    assert!(small.can_proceed);
}

#[tokio::test]
async fn unknown_free_session_counts_as_unused() {
    let (_, accountant) = setup().await;
    let decision = accountant
        .check_free_user_limits("never-seen", 100, 100)
        .await
        .unwrap();
    assert!(decision.can_proceed);
    assert_eq!(decision.tokens_used, 0);
}

#[tokio::test]
async fn registered_check_refuses_exactly_when_balance_is_short() {
    let (db, accountant) = setup().await;
    let user = db
        .create_user_with_email("u@example.com", "hash", UserRole::User, 100)
        .await
        .unwrap();

    for (required, expected) in [(99, true), (100, true), (101, false)] {
        let decision = accountant
            .check_registered_user_tokens(user.user_id, required)
            .await
            .unwrap();
        assert_eq!(decision.can_proceed, expected, "required {}", required);
        assert_eq!(decision.current_balance, 100);
    }
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let (_, accountant) = setup().await;
    let err = accountant
        .check_registered_user_tokens(Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn admin_balance_is_restored_and_never_debited() {
    let (db, accountant) = setup().await;
    let admin = db
        .create_user_with_email("admin@example.com", "hash", UserRole::Admin, 5)
        .await
        .unwrap();

    let decision = accountant
        .check_registered_user_tokens(admin.user_id, 1_000_000)
        .await
        .unwrap();
    assert!(decision.can_proceed);
    assert!(decision.current_balance >= UNLIMITED_BALANCE);

    let debit = accountant
        .deduct_registered_user_tokens(admin.user_id, 250.0, UsageKind::Analysis, "test")
        .await
        .unwrap();
    assert_eq!(debit.tokens_charged, 0);

    let stored = db.get_user_by_id(admin.user_id).await.unwrap().unwrap();
    assert!(stored.token_balance >= UNLIMITED_BALANCE);
    assert!(db.get_usage_for_user(admin.user_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_accounts_for_every_balance_change() {
    let (db, accountant) = setup().await;
    let user = db
        .create_user_with_email("l@example.com", "hash", UserRole::User, 1_000)
        .await
        .unwrap();

    accountant
        .deduct_registered_user_tokens(user.user_id, 120.2, UsageKind::Analysis, "a")
        .await
        .unwrap();
    accountant
        .add_tokens_to_user(user.user_id, 500, "purchase")
        .await
        .unwrap();
    accountant
        .deduct_registered_user_tokens(user.user_id, 30.0, UsageKind::Upload, "b")
        .await
        .unwrap();

    let final_balance = db
        .get_user_by_id(user.user_id)
        .await
        .unwrap()
        .unwrap()
        .token_balance;
    // 120.2 rounds up to 121.
    assert_eq!(final_balance, 1_000 - 121 + 500 - 30);

    let ledger = db.get_usage_for_user(user.user_id, 100).await.unwrap();
    assert_eq!(ledger.len(), 3);
    let net: i64 = ledger.iter().map(|r| r.tokens_used).sum();
    assert_eq!(1_000 - net, final_balance);
    assert_eq!(ledger[0].tokens_remaining, final_balance);
    assert_eq!(ledger[1].kind, UsageKind::Purchase);
    assert_eq!(ledger[1].tokens_used, -500);
}

#[tokio::test]
async fn debit_is_capped_at_the_remaining_balance() {
    let (db, accountant) = setup().await;
    let user = db
        .create_user_with_email("c@example.com", "hash", UserRole::User, 40)
        .await
        .unwrap();

    let debit = accountant
        .deduct_registered_user_tokens(user.user_id, 100.0, UsageKind::Analysis, "big")
        .await
        .unwrap();
    assert_eq!(debit.tokens_charged, 40);
    assert_eq!(debit.tokens_remaining, 0);

    let ledger = db.get_usage_for_user(user.user_id, 10).await.unwrap();
    assert_eq!(ledger[0].tokens_used, 40);
}

#[tokio::test]
async fn concurrent_debits_all_apply() {
    let (db, accountant) = setup().await;
    let user = db
        .create_user_with_email("p@example.com", "hash", UserRole::User, 100)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let accountant = accountant.clone();
        let user_id = user.user_id;
        handles.push(tokio::spawn(async move {
            accountant
                .deduct_registered_user_tokens(user_id, 10.0, UsageKind::Analysis, &format!("debit {}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = db.get_user_by_id(user.user_id).await.unwrap().unwrap();
    assert_eq!(stored.token_balance, 60);
    assert_eq!(db.get_usage_for_user(user.user_id, 10).await.unwrap().len(), 4);
}

#[tokio::test]
async fn free_debits_accumulate_on_the_session() {
    let (db, accountant) = setup().await;
    db.create_anonymous_session("anon-2", Some("203.0.113.9"), Some("test"))
        .await
        .unwrap();

    let first = accountant
        .deduct_free_user_tokens("anon-2", 299.5, UsageKind::Analysis, "one")
        .await
        .unwrap();
    assert_eq!(first.tokens_charged, 300);
    assert_eq!(first.tokens_remaining, 700);

    let session = db.get_anonymous_session("anon-2").await.unwrap().unwrap();
    assert_eq!(session.tokens_used, 300);
    assert_eq!(db.get_usage_for_session("anon-2", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn crediting_a_non_positive_amount_fails() {
    let (db, accountant) = setup().await;
    let user = db
        .create_user_with_email("z@example.com", "hash", UserRole::User, 0)
        .await
        .unwrap();
    assert!(accountant.add_tokens_to_user(user.user_id, 0, "nothing").await.is_err());
}

#[tokio::test]
async fn free_debits_never_exceed_the_lifetime_allowance() {
    let (db, accountant) = setup().await;
    db.create_anonymous_session("anon-3", None, None)
        .await
        .unwrap();

    let decision = accountant
        .check_free_user_limits("anon-3", 500, 300)
        .await
        .unwrap();
    assert!(decision.can_proceed);

    // The provider answered far beyond the reserved output budget.
    let outcome = accountant
        .deduct_free_user_tokens("anon-3", 2_500.0, UsageKind::Analysis, "long answer")
        .await
        .unwrap();
    assert_eq!(outcome.tokens_charged, FREE_LIFETIME_TOKENS);
    assert_eq!(outcome.tokens_remaining, 0);

    let session = db.get_anonymous_session("anon-3").await.unwrap().unwrap();
    assert_eq!(session.tokens_used, FREE_LIFETIME_TOKENS);

    let spent = accountant
        .deduct_free_user_tokens("anon-3", 10.0, UsageKind::Upload, "after the cap")
        .await
        .unwrap();
    assert_eq!(spent.tokens_charged, 0);

    let ledger = db.get_usage_for_session("anon-3", 10).await.unwrap();
    let recorded: i64 = ledger.iter().map(|row| row.tokens_used).sum();
    assert_eq!(recorded, FREE_LIFETIME_TOKENS);
}
