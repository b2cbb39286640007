//! Integration tests for `AuditService`.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Counter, CounterSnapshot};
use loanbook_core::aggregate::AggregateRoot;
use loanbook_core::audit::{AuditFilter, AuditRecord, AuditService};
use loanbook_core::event::ActorContext;
use loanbook_core::event_sourced::EventSourcedRepository;
use loanbook_core::repository::{EventStore, NewEvent};
use loanbook_test_support::{
    FailingAuditStore, FixedClock, InMemoryAuditStore, InMemoryEventStore, SteppingClock,
};
use uuid::Uuid;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

fn service_with(
    store: Arc<InMemoryAuditStore>,
    events: Arc<InMemoryEventStore>,
) -> AuditService {
    AuditService::new(
        store,
        events,
        Arc::new(SteppingClock::new(start(), Duration::minutes(1))),
        "test-salt",
    )
}

fn record(entity_id: &str, event_type: &str, actor: ActorContext) -> AuditRecord {
    AuditRecord::new("loan_application", entity_id, event_type, actor)
}

#[tokio::test]
async fn test_record_stamps_time_and_history_is_newest_first() {
    // Arrange
    let store = Arc::new(InMemoryAuditStore::new());
    let service = service_with(store.clone(), Arc::new(InMemoryEventStore::new()));
    let actor = ActorContext::user(Uuid::new_v4());

    // Act
    service
        .record_audit_entry(
            record("loan-1", "status_changed", actor.clone()).with_changes(
                Some(serde_json::json!({"status": "submitted"})),
                Some(serde_json::json!({"status": "under_review"})),
            ),
        )
        .await;
    service
        .record_audit_entry(record("loan-1", "viewed", actor.clone()))
        .await;
    service
        .record_audit_entry(record("loan-2", "viewed", actor))
        .await;

    // Assert
    let history = service
        .get_audit_history("loan_application", "loan-1", &AuditFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].event_type, "viewed");
    assert_eq!(history[0].occurred_at, start() + Duration::minutes(1));
    assert_eq!(history[1].event_type, "status_changed");
    assert_eq!(
        history[1].new_values,
        Some(serde_json::json!({"status": "under_review"}))
    );
}

#[tokio::test]
async fn test_history_honors_window_and_limit() {
    // Arrange
    let store = Arc::new(InMemoryAuditStore::new());
    let service = service_with(store, Arc::new(InMemoryEventStore::new()));
    for _ in 0..5 {
        service
            .record_audit_entry(record("loan-1", "viewed", ActorContext::system()))
            .await;
    }
    let filter = AuditFilter {
        since: Some(start() + Duration::minutes(1)),
        until: Some(start() + Duration::minutes(3)),
        limit: Some(2),
    };

    // Act
    let history = service
        .get_audit_history("loan_application", "loan-1", &filter)
        .await
        .unwrap();

    // Assert
    let times: Vec<_> = history.iter().map(|e| e.occurred_at).collect();
    assert_eq!(
        times,
        vec![start() + Duration::minutes(3), start() + Duration::minutes(2)]
    );
}

#[tokio::test]
async fn test_record_failure_is_swallowed() {
    let service = AuditService::new(
        Arc::new(FailingAuditStore),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(FixedClock(start())),
        "test-salt",
    );

    service
        .record_audit_entry(record("loan-1", "viewed", ActorContext::system()))
        .await;

    let history = service
        .get_audit_history("loan_application", "loan-1", &AuditFilter::default())
        .await;
    assert!(history.is_err());
}

#[tokio::test]
async fn test_by_user_and_delete_only_touch_that_user() {
    // Arrange
    let store = Arc::new(InMemoryAuditStore::new());
    let service = service_with(store.clone(), Arc::new(InMemoryEventStore::new()));
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    service
        .record_audit_entry(record("loan-1", "viewed", ActorContext::user(alice)))
        .await;
    service
        .record_audit_entry(record("loan-2", "viewed", ActorContext::user(alice)))
        .await;
    service
        .record_audit_entry(record("loan-1", "viewed", ActorContext::user(bob)))
        .await;

    // Act
    let alices = service
        .get_audit_by_user(alice, &AuditFilter::default())
        .await
        .unwrap();
    let deleted = service.delete_user_audit_data(alice).await.unwrap();

    // Assert
    assert_eq!(alices.len(), 2);
    assert_eq!(deleted, 2);
    let remaining = store.entries();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].actor.user_id, Some(bob));
}

#[tokio::test]
async fn test_anonymize_replaces_identity_with_stable_token() {
    // Arrange
    let store = Arc::new(InMemoryAuditStore::new());
    let service = service_with(store.clone(), Arc::new(InMemoryEventStore::new()));
    let alice = Uuid::new_v4();
    let actor = ActorContext::user(alice).with_client("203.0.113.7", "curl/8.0");
    service
        .record_audit_entry(record("loan-1", "viewed", actor.clone()))
        .await;
    service
        .record_audit_entry(record("loan-2", "viewed", actor))
        .await;

    // Act
    let rewritten = service.anonymize_user_audit_data(alice).await.unwrap();

    // Assert
    assert_eq!(rewritten, 2);
    let token = service.anonymized_token(alice);
    assert!(token.starts_with("anon-"));
    assert_eq!(token.len(), "anon-".len() + 16);
    for entry in store.entries() {
        assert_eq!(entry.actor.user_id, None);
        assert_eq!(entry.actor.ip_address, None);
        assert_eq!(entry.actor.user_agent, None);
        assert_eq!(entry.anonymized_token.as_deref(), Some(token.as_str()));
    }
    assert!(
        service
            .get_audit_by_user(alice, &AuditFilter::default())
            .await
            .unwrap()
            .is_empty()
    );

    let rows = service
        .generate_audit_report(start(), start() + Duration::hours(1), None)
        .await
        .unwrap();
    assert_eq!(rows[0].event_count, 2);
    assert_eq!(rows[0].distinct_users, 1);
}

#[tokio::test]
async fn test_anonymized_token_depends_on_salt() {
    let user = Uuid::new_v4();
    let events = Arc::new(InMemoryEventStore::new());
    let clock = Arc::new(FixedClock(start()));
    let a = AuditService::new(
        Arc::new(InMemoryAuditStore::new()),
        events.clone(),
        clock.clone(),
        "one",
    );
    let b = AuditService::new(Arc::new(InMemoryAuditStore::new()), events, clock, "two");

    assert_eq!(a.anonymized_token(user), a.anonymized_token(user));
    assert_ne!(a.anonymized_token(user), b.anonymized_token(user));
}

#[tokio::test]
async fn test_report_filters_by_entity_type_and_window() {
    // Arrange
    let store = Arc::new(InMemoryAuditStore::new());
    let service = service_with(store, Arc::new(InMemoryEventStore::new()));
    let user = ActorContext::user(Uuid::new_v4());
    service
        .record_audit_entry(record("loan-1", "viewed", user.clone()))
        .await;
    service
        .record_audit_entry(AuditRecord::new("command", "cmd-1", "command_started", user.clone()))
        .await;
    service
        .record_audit_entry(record("loan-2", "viewed", user))
        .await;

    // Act
    let loans_only = service
        .generate_audit_report(start(), start() + Duration::hours(1), Some("loan_application"))
        .await
        .unwrap();
    let first_minute = service
        .generate_audit_report(start(), start(), None)
        .await
        .unwrap();

    // Assert
    assert_eq!(loans_only.len(), 1);
    assert_eq!(loans_only[0].event_count, 2);
    assert_eq!(loans_only[0].distinct_entities, 2);
    assert_eq!(loans_only[0].first_occurrence, start());
    assert_eq!(loans_only[0].last_occurrence, start() + Duration::minutes(2));
    assert_eq!(first_minute.len(), 1);
    assert_eq!(first_minute[0].entity_type, "loan_application");
}

async fn counter_with_history(events: &Arc<InMemoryEventStore>) -> Uuid {
    let clock = SteppingClock::new(start(), Duration::hours(1));
    let repo = EventSourcedRepository::<Counter>::new(events.clone());
    let actor = ActorContext::system();
    let id = Uuid::new_v4();
    let mut counter = Counter::empty(id);
    counter.increment(2, &actor, &clock);
    counter.increment(3, &actor, &clock);
    counter.label("closed", &actor, &clock);
    repo.save(&mut counter).await.unwrap();
    id
}

#[tokio::test]
async fn test_reconstruct_before_first_event_is_none() {
    let events = Arc::new(InMemoryEventStore::new());
    let id = counter_with_history(&events).await;
    let service = service_with(Arc::new(InMemoryAuditStore::new()), events);

    let state = service
        .reconstruct_entity_state::<Counter>(id, start() - Duration::seconds(1))
        .await
        .unwrap();

    assert!(state.is_none());
}

#[tokio::test]
async fn test_reconstruct_includes_events_at_the_instant() {
    // Arrange
    let events = Arc::new(InMemoryEventStore::new());
    let id = counter_with_history(&events).await;
    let service = service_with(Arc::new(InMemoryAuditStore::new()), events);

    // Act
    let state = service
        .reconstruct_entity_state::<Counter>(id, start() + Duration::hours(1))
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(state.entity_type, "counter");
    assert_eq!(state.version, 2);
    assert_eq!(state.last_event_at, start() + Duration::hours(1));
    assert_eq!(
        state.state,
        CounterSnapshot {
            total: 5,
            label: None
        }
    );
}

#[tokio::test]
async fn test_reconstruct_after_last_event_matches_current_state() {
    // Arrange
    let events = Arc::new(InMemoryEventStore::new());
    let id = counter_with_history(&events).await;
    let current = EventSourcedRepository::<Counter>::new(events.clone())
        .load(id)
        .await
        .unwrap();
    let service = service_with(Arc::new(InMemoryAuditStore::new()), events);

    // Act
    let state = service
        .reconstruct_entity_state::<Counter>(id, start() + Duration::days(30))
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(state.version, current.version());
    assert_eq!(state.state, current.take_snapshot());
    assert_eq!(state.last_event_at, start() + Duration::hours(2));
}

#[tokio::test]
async fn test_reconstruct_unknown_aggregate_is_none() {
    let service = service_with(
        Arc::new(InMemoryAuditStore::new()),
        Arc::new(InMemoryEventStore::new()),
    );

    let state = service
        .reconstruct_entity_state::<Counter>(Uuid::new_v4(), start())
        .await
        .unwrap();

    assert!(state.is_none());
}

#[tokio::test]
async fn test_reconstruct_ignores_undecodable_events_after_the_cutoff() {
    // Arrange
    let events = Arc::new(InMemoryEventStore::new());
    let id = counter_with_history(&events).await;
    events
        .append(
            NewEvent {
                event_id: Uuid::new_v4(),
                aggregate_id: id,
                aggregate_type: "counter".to_owned(),
                event_type: "counter.renamed_in_a_later_release".to_owned(),
                payload: serde_json::json!({"unexpected": true}),
                occurred_at: start() + Duration::days(2),
                actor: ActorContext::system(),
            },
            Some(3),
        )
        .await
        .unwrap();
    let service = service_with(Arc::new(InMemoryAuditStore::new()), events);

    // Act
    let before = service
        .reconstruct_entity_state::<Counter>(id, start() + Duration::hours(1))
        .await;
    let after = service
        .reconstruct_entity_state::<Counter>(id, start() + Duration::days(3))
        .await;

    // Assert
    let state = before.unwrap().unwrap();
    assert_eq!(state.version, 2);
    assert_eq!(state.state.total, 5);
    assert!(after.is_err());
}
