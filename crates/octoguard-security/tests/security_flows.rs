//! End-to-end flows through `SecurityServices` on the in-process store.

use std::sync::Arc;
use std::time::Duration;

use octoguard_db_memory::InMemoryStore;
use octoguard_security::{
    EscalationState, KvStore, SecurityConfig, SecurityServices, config::AuditConfig,
};
use octoguard_storage::{DynStore, ManualClock};
use serde_json::json;

fn services_with_clock(config: &SecurityConfig) -> (SecurityServices, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let store: DynStore = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (SecurityServices::with_store(store, config), clock)
}

#[tokio::test]
async fn test_nine_violations_warn_tenth_blocks() {
    let (services, _) = services_with_clock(&SecurityConfig::default());
    let guard = &services.ip_guard;

    for _ in 0..9 {
        let record = guard.record_violation("203.0.113.7", "failed login").await;
        assert!(!record.triggered_block());
    }
    assert_eq!(
        guard.escalation_state("203.0.113.7").await,
        EscalationState::Warned { count: 9 }
    );

    let record = guard.record_violation("203.0.113.7", "failed login").await;
    assert_eq!(record.count, 10);
    let block = guard.is_blocked("203.0.113.7").await.expect("blocked");
    assert_eq!(block.reason, "failed login");

    let entries = services.audit.get_entries(100).await;
    assert_eq!(entries.len(), 11);
    let newest = entries[0].as_structured().unwrap();
    assert_eq!(newest["action"], "ip.blocked");
    assert_eq!(newest["automatic"], true);
    let trigger = entries[1].as_structured().unwrap();
    assert_eq!(trigger["action"], "ip.violation");
    assert_eq!(trigger["count"], 10);
    assert_eq!(trigger["reason"], "failed login");
}

#[tokio::test]
async fn test_block_lapses_after_duration() {
    let (services, clock) = services_with_clock(&SecurityConfig::default());
    let guard = &services.ip_guard;

    guard.block_ip("1.2.3.4", "abuse", 3600).await.unwrap();
    assert!(guard.is_blocked("1.2.3.4").await.is_some());
    assert_eq!(guard.blocked_ips().await.len(), 1);

    clock.advance(Duration::from_secs(3601));
    assert!(guard.is_blocked("1.2.3.4").await.is_none());
    assert!(guard.blocked_ips().await.is_empty());
}

#[tokio::test]
async fn test_unblock_is_audited() {
    let (services, _) = services_with_clock(&SecurityConfig::default());

    services.ip_guard.block_ip("198.51.100.1", "manual", 60).await;
    assert!(services.ip_guard.unblock("198.51.100.1").await);

    let entries = services.audit.get_entries(10).await;
    let actions: Vec<_> = entries
        .iter()
        .map(|e| e.as_structured().unwrap()["action"].clone())
        .collect();
    assert_eq!(actions, vec![json!("ip.unblocked"), json!("ip.blocked")]);
}

#[tokio::test]
async fn test_csrf_token_is_single_use_and_identity_bound() {
    let (services, _) = services_with_clock(&SecurityConfig::default());
    let csrf = &services.csrf;

    let token = csrf.issue("alice").await;
    assert!(!csrf.validate_and_consume(token.as_str(), "mallory").await);
    assert!(csrf.validate_and_consume(token.as_str(), "alice").await);
    assert!(!csrf.validate_and_consume(token.as_str(), "alice").await);
}

#[tokio::test]
async fn test_concurrent_validation_succeeds_once() {
    let (services, _) = services_with_clock(&SecurityConfig::default());
    let token = services.csrf.issue("alice").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let csrf = services.csrf.clone();
        let token = token.token.clone();
        handles.push(tokio::spawn(async move {
            csrf.validate_and_consume(&token, "alice").await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn test_audit_keeps_newest_entries() {
    let config = SecurityConfig {
        audit: AuditConfig {
            max_entries: 20,
            ..AuditConfig::default()
        },
        ..SecurityConfig::default()
    };
    let (services, _) = services_with_clock(&config);

    for n in 0..25 {
        services.audit.push_entry(json!({"n": n})).await;
    }

    assert_eq!(services.audit.len().await, 20);
    let entries = services.audit.get_entries(1000).await;
    assert_eq!(entries.len(), 20);
    assert_eq!(entries[0].as_structured().unwrap()["n"], 24);
    assert_eq!(entries[19].as_structured().unwrap()["n"], 5);
}

#[tokio::test]
async fn test_services_share_one_keyspace() {
    let (services, _) = services_with_clock(&SecurityConfig::default());

    services.csrf.issue("alice").await;
    services.ip_guard.record_violation("10.1.1.1", "x").await;
    services.ip_guard.block_ip("10.1.1.2", "y", 60).await;

    let store = &services.store;
    assert_eq!(store.keys_matching("csrf:*").await.unwrap().len(), 1);
    assert_eq!(
        store.keys_matching("violations:*").await.unwrap().len(),
        1
    );
    assert_eq!(
        store.keys_matching("blocked_ip:*").await.unwrap().len(),
        1
    );
    assert!(store.exists("audit:trail").await.unwrap());
}

#[tokio::test]
async fn test_services_fail_open_after_shutdown() {
    let (services, _) = services_with_clock(&SecurityConfig::default());
    services.shutdown().await;

    let token = services.csrf.issue("alice").await;
    assert!(!services.csrf.validate_and_consume(token.as_str(), "alice").await);
    assert!(services.ip_guard.is_blocked("10.0.0.1").await.is_none());
    services.audit.push_entry(json!({"n": 1})).await;
    assert!(services.audit.get_entries(10).await.is_empty());
}
