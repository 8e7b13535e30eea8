//! Registry CRUD, sanitisation, name resolution, and persistence tests.

use std::sync::Arc;
use swarmllm::agent::{Agent, AgentStatus, ProviderKind};
use swarmllm::event::{EventBus, SwarmEvent};
use swarmllm::persistence::{AgentStore, JsonFileStore};
use swarmllm::registry::{AgentRegistry, AgentUpdate};
use swarmllm::SwarmError;
use tempfile::TempDir;

#[tokio::test]
async fn test_create_publishes_sanitised_record() {
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let registry = AgentRegistry::new(bus);

    registry
        .create(Agent::new("a1", "Alpha").with_credential("sk-secret"))
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        SwarmEvent::AgentCreated { agent } => {
            assert_eq!(agent.id, "a1");
            assert!(agent.has_credential);
            // The payload must not leak the credential anywhere.
            let payload = serde_json::to_string(&agent).unwrap();
            assert!(!payload.contains("sk-secret"));
        }
        other => panic!("unexpected event {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let registry = AgentRegistry::new(EventBus::new(64));
    registry.create(Agent::new("a1", "Alpha")).await.unwrap();
    let err = registry.create(Agent::new("a1", "Beta")).await.unwrap_err();
    assert!(matches!(err, SwarmError::BadRequest(_)));
}

#[tokio::test]
async fn test_update_whitelist() {
    let registry = AgentRegistry::new(EventBus::new(64));
    registry.create(Agent::new("a1", "Alpha")).await.unwrap();

    let view = registry
        .update(
            "a1",
            AgentUpdate {
                model: Some("claude-sonnet-4-0".to_string()),
                provider: Some(ProviderKind::Anthropic),
                temperature: Some(2.5),
                project: Some(Some("demo".to_string())),
                ..AgentUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(view.model, "claude-sonnet-4-0");
    assert_eq!(view.provider, ProviderKind::Anthropic);
    // Out-of-range temperatures are clamped into 0..=1.
    assert!((view.temperature - 1.0).abs() < f32::EPSILON);
    assert_eq!(view.project.as_deref(), Some("demo"));
}

#[tokio::test]
async fn test_name_resolution_case_insensitive_with_insertion_tiebreak() {
    let registry = AgentRegistry::new(EventBus::new(64));
    registry.create(Agent::new("first", "Dev")).await.unwrap();
    registry.create(Agent::new("second", "dev")).await.unwrap();

    let (id, _) = registry.resolve_by_name("DEV", None).await.unwrap();
    assert_eq!(id, "first");

    // Excluding the first hit falls through to the next in order.
    let (id, _) = registry.resolve_by_name("dev", Some("first")).await.unwrap();
    assert_eq!(id, "second");

    assert!(registry.resolve_by_name("nobody", None).await.is_none());
}

#[tokio::test]
async fn test_delete_removes_and_publishes() {
    let bus = EventBus::new(64);
    let registry = AgentRegistry::new(bus.clone());
    registry.create(Agent::new("a1", "Alpha")).await.unwrap();

    let mut rx = bus.subscribe();
    registry.delete("a1").await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        SwarmEvent::AgentDeleted { .. }
    ));
    assert!(registry.view("a1").await.is_err());
    assert!(matches!(
        registry.delete("a1").await.unwrap_err(),
        SwarmError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_startup_load_resets_runtime_state() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());

    // Persist an agent that crashed mid-turn.
    let mut agent = Agent::new("a1", "Alpha");
    agent.status = AgentStatus::Busy;
    store.save(&agent).await.unwrap();

    let registry = AgentRegistry::new(EventBus::new(64)).with_store(store);
    let loaded = registry.load_from_store().await.unwrap();
    assert_eq!(loaded, 1);

    let view = registry.view("a1").await.unwrap();
    assert_eq!(view.status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_seed_defaults_once() {
    let registry = AgentRegistry::new(EventBus::new(64));
    registry.seed_defaults().await.unwrap();
    let first = registry.list().await;
    assert!(!first.is_empty());
    assert!(first.iter().any(|v| v.leader));

    // Seeding again on a populated registry is a no-op.
    registry.seed_defaults().await.unwrap();
    assert_eq!(registry.list().await.len(), first.len());
}

#[tokio::test]
async fn test_list_preserves_insertion_order() {
    let registry = AgentRegistry::new(EventBus::new(64));
    for (id, name) in [("c", "Gamma"), ("a", "Alpha"), ("b", "Beta")] {
        registry.create(Agent::new(id, name)).await.unwrap();
    }
    let ids: Vec<String> = registry.list().await.into_iter().map(|v| v.id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}
