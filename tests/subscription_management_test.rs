//! Subscription management through the engine facade.
//!
//! Subscriptions are registry entries for downstream consumers; the delivery
//! path never reads them, so these tests run without starting the engine.

use sinker_core::{CoreError, SubscriptionUpdate};
use sinker_delivery::{DeliveryError, EngineConfig};
use sinker_testing::{SubscriptionBuilder, TestEnv};

#[tokio::test]
async fn full_subscription_lifecycle() {
    let env = TestEnv::new().await;
    let engine = env.engine(EngineConfig::default()).expect("engine builds");

    let created = engine
        .create_subscription(SubscriptionBuilder::named("billing").build())
        .await
        .expect("subscription accepted");
    assert!(created.active);
    assert_eq!(created.event_names(), ["order.created"]);

    let fetched = engine
        .get_subscription(created.id)
        .await
        .expect("lookup succeeds")
        .expect("subscription exists");
    assert_eq!(fetched.name, "billing");

    let renamed = engine
        .update_subscription(
            created.id,
            SubscriptionUpdate {
                name: Some("billing-eu".to_string()),
                url: None,
                events: None,
                secret: None,
                active: None,
            },
        )
        .await
        .expect("rename applies");
    assert_eq!(renamed.name, "billing-eu");
    assert_eq!(renamed.url, fetched.url, "unset fields keep their stored value");

    let deactivated = engine
        .update_subscription(
            created.id,
            SubscriptionUpdate {
                name: None,
                url: None,
                events: None,
                secret: None,
                active: Some(false),
            },
        )
        .await
        .expect("deactivation applies");
    assert!(!deactivated.active);
    assert!(engine.list_active_subscriptions().await.expect("list succeeds").is_empty());
    assert_eq!(engine.list_subscriptions().await.expect("list succeeds").len(), 1);

    engine.delete_subscription(created.id).await.expect("delete succeeds");
    assert!(engine.get_subscription(created.id).await.expect("lookup succeeds").is_none());
}

#[tokio::test]
async fn duplicate_urls_are_rejected() {
    let env = TestEnv::new().await;
    let engine = env.engine(EngineConfig::default()).expect("engine builds");

    engine
        .create_subscription(
            SubscriptionBuilder::named("billing").url("https://hooks.example.com/shared").build(),
        )
        .await
        .expect("first registration accepted");

    let error = engine
        .create_subscription(
            SubscriptionBuilder::named("shipping").url("https://hooks.example.com/shared").build(),
        )
        .await
        .expect_err("second registration collides");

    assert!(matches!(error, DeliveryError::Core(CoreError::Conflict(_))), "got {error:?}");
}

#[tokio::test]
async fn blank_fields_are_rejected() {
    let env = TestEnv::new().await;
    let engine = env.engine(EngineConfig::default()).expect("engine builds");

    let error = engine
        .create_subscription(SubscriptionBuilder::named("  ").build())
        .await
        .expect_err("blank name is invalid");
    assert!(matches!(error, DeliveryError::Core(CoreError::InvalidInput(_))), "got {error:?}");

    let created = engine
        .create_subscription(SubscriptionBuilder::named("billing").build())
        .await
        .expect("subscription accepted");

    let error = engine
        .update_subscription(
            created.id,
            SubscriptionUpdate {
                name: None,
                url: Some("   ".to_string()),
                events: None,
                secret: None,
                active: None,
            },
        )
        .await
        .expect_err("blank url is invalid");
    assert!(matches!(error, DeliveryError::Core(CoreError::InvalidInput(_))), "got {error:?}");
}
