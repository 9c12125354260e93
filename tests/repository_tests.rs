//! PostgreSQL 存储层测试
//!
//! 需要数据库：设置 TEST_DATABASE_URL 后运行 `cargo test -- --ignored`

use chrono::{Duration, Utc};
use serial_test::serial;
use user_api::{
    error::AppError,
    models::{
        usage::{RiskReportUsage, UsageFilter},
        user::{NewUser, Role, UserChanges, UserFilter, UserStatus},
    },
    repository::{PgUsageStore, PgUserStore, UsageStore, UserStore},
};
use uuid::Uuid;

mod common;
use common::{create_test_config, setup_test_db};

fn new_user(username: &str, email: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$v=19$m=4096,t=1,p=1$c2FsdA$aGFzaA".to_string(),
        nickname: username.to_string(),
        status: UserStatus::Active,
        role: Role::User,
    }
}

fn usage(user_id: &str, minutes_ago: i64, tokens: (i32, i32)) -> RiskReportUsage {
    let request_time = Utc::now() - Duration::minutes(minutes_ago);
    RiskReportUsage {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        ticker: "AAPL".to_string(),
        request_time,
        response_time: request_time + Duration::seconds(1),
        prompt_tokens: tokens.0,
        completion_tokens: tokens.1,
        total_tokens: tokens.0 + tokens.1,
        ai_response: "ok".to_string(),
        stock_price: Some(101.5),
        market_state: Some("CLOSED".to_string()),
        news_sentiment_score: None,
        news_sentiment_label: None,
        peak_signals_triggered: None,
        action_suggestion: None,
        rate_limit_remaining: None,
        error_message: None,
        response_duration_ms: Some(1000),
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_user_store_crud_and_uniqueness() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = PgUserStore::new(pool);

    let alice = store.create(new_user("alice", "alice@x.com")).await.unwrap();
    assert_eq!(alice.role, Role::User);
    assert_eq!(alice.status, UserStatus::Active);

    assert!(matches!(
        store.create(new_user("alice", "other@x.com")).await,
        Err(AppError::UsernameExists)
    ));
    assert!(matches!(
        store.create(new_user("bob", "alice@x.com")).await,
        Err(AppError::EmailAlreadyUsed)
    ));

    let found = store.find_by_username_or_email("alice@x.com").await.unwrap().unwrap();
    assert_eq!(found.id, alice.id);

    let updated = store
        .update_fields(
            alice.id,
            &UserChanges {
                nickname: Some("Ally".to_string()),
                role: Some(Role::Admin),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.nickname, "Ally");
    assert_eq!(updated.role, Role::Admin);

    store
        .update_last_login(alice.id, Utc::now(), "127.0.0.1")
        .await
        .unwrap();
    let reloaded = store.find_by_id(alice.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_login_ip.as_deref(), Some("127.0.0.1"));

    assert!(store.soft_delete(alice.id).await.unwrap());
    assert!(store.find_by_id(alice.id).await.unwrap().is_none());
    assert!(!store.exists_by_username("alice").await.unwrap());

    // 软删除后可重新使用用户名
    store.create(new_user("alice", "alice@x.com")).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
    store.ping().await.unwrap();
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_user_store_list() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = PgUserStore::new(pool);

    for name in ["dora", "anna", "carl", "bert"] {
        store
            .create(new_user(name, &format!("{}@x.com", name)))
            .await
            .unwrap();
    }

    let filter = UserFilter {
        sort_by: user_api::models::user::UserSortField::Username,
        sort_order: user_api::models::user::SortOrder::Asc,
        limit: 2,
        offset: 1,
        ..Default::default()
    };
    let (users, total) = store.list(&filter).await.unwrap();
    assert_eq!(total, 4);
    let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["bert", "carl"]);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_usage_store_batch_and_stats() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let store = PgUsageStore::new(pool);

    let records =
        vec![usage("u-1", 10, (100, 50)), usage("u-1", 5, (20, 30)), usage("u-2", 1, (1, 1))];
    store.insert_many(&records).await.unwrap();

    let fetched = store.find_by_id(records[0].id).await.unwrap().unwrap();
    assert_eq!(fetched.market_state.as_deref(), Some("CLOSED"));

    let (items, total) = store
        .list(&UsageFilter {
            user_id: Some("u-1".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(items[0].id, records[1].id);

    let stats = store.stats_for_user("u-1", None, None).await.unwrap();
    assert_eq!(stats.total_queries, 2);
    assert_eq!(stats.total_tokens, 200);
    assert_eq!(stats.avg_response_time_ms, 1000);
}
