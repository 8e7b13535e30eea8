//! End-to-end conversation-engine scenarios driven by scripted providers.

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use swarmllm::agent::{Agent, AgentStatus};
use swarmllm::client_wrapper::{ChatOptions, ChunkStream, ClientWrapper, Message, StreamChunk};
use swarmllm::config::SwarmConfig;
use swarmllm::engine::{ClientFactory, SwarmEngine, SwarmError};
use swarmllm::event::{EventBus, SwarmEvent};
use swarmllm::registry::AgentRegistry;
use tempfile::TempDir;

/// One scripted model response.
#[derive(Clone)]
enum Script {
    /// Stream the text as a single chunk, then a Done with usage.
    Respond(String),
    /// Stream each chunk, then hang until cancelled.
    HangAfter(Vec<String>),
}

/// Factory handing each agent a queue of scripted responses and recording
/// every prompt it receives.
struct ScriptedFactory {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
    prompts: Arc<Mutex<Vec<(String, Vec<Message>)>>>,
}

impl ScriptedFactory {
    fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn script(&self, agent_id: &str, responses: &[&str]) {
        let mut scripts = self.scripts.lock().unwrap();
        let lane = scripts.entry(agent_id.to_string()).or_default();
        for response in responses {
            lane.push_back(Script::Respond(response.to_string()));
        }
    }

    fn script_hang(&self, agent_id: &str, chunks: &[&str]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(Script::HangAfter(
                chunks.iter().map(|c| c.to_string()).collect(),
            ));
    }

    /// Prompts the given agent has received so far.
    fn prompts_for(&self, agent_id: &str) -> Vec<Vec<Message>> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == agent_id)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

struct ScriptedClient {
    agent_id: String,
    scripts: Arc<Mutex<HashMap<String, VecDeque<Script>>>>,
    prompts: Arc<Mutex<Vec<(String, Vec<Message>)>>>,
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        self.prompts
            .lock()
            .unwrap()
            .push((self.agent_id.clone(), messages.to_vec()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&self.agent_id)
            .and_then(|lane| lane.pop_front())
            .unwrap_or_else(|| Script::Respond("(done)".to_string()));

        type Item = Result<StreamChunk, Box<dyn Error + Send + Sync>>;
        match script {
            Script::Respond(text) => {
                let mut items: Vec<Item> = Vec::new();
                if !text.is_empty() {
                    items.push(Ok(StreamChunk::Text { delta: text }));
                }
                items.push(Ok(StreamChunk::Done {
                    input_tokens: 5,
                    output_tokens: 7,
                }));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::HangAfter(chunks) => {
                let items: Vec<Item> = chunks
                    .into_iter()
                    .map(|delta| Ok(StreamChunk::Text { delta }))
                    .collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

impl ClientFactory for ScriptedFactory {
    fn client_for(&self, agent: &Agent) -> Result<Arc<dyn ClientWrapper>, SwarmError> {
        Ok(Arc::new(ScriptedClient {
            agent_id: agent.id.clone(),
            scripts: Arc::clone(&self.scripts),
            prompts: Arc::clone(&self.prompts),
        }))
    }
}

struct Harness {
    engine: SwarmEngine,
    factory: Arc<ScriptedFactory>,
    bus: EventBus,
    _projects: TempDir,
    projects_root: std::path::PathBuf,
}

async fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let projects = TempDir::new().unwrap();
    let projects_root = projects.path().to_path_buf();
    let bus = EventBus::new(1024);
    let registry = Arc::new(AgentRegistry::new(bus.clone()));
    let config = SwarmConfig {
        projects_root: projects_root.clone(),
        ..SwarmConfig::default()
    };
    let factory = Arc::new(ScriptedFactory::new());
    let engine = SwarmEngine::new(registry, bus.clone(), config)
        .with_client_factory(Arc::clone(&factory) as Arc<dyn ClientFactory>);
    Harness {
        engine,
        factory,
        bus,
        _projects: projects,
        projects_root,
    }
}

fn sink() -> swarmllm::engine::ChunkCallback {
    Arc::new(|_chunk: &str| {})
}

fn drain_kinds(rx: &mut tokio::sync::broadcast::Receiver<SwarmEvent>) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind().to_string());
    }
    kinds
}

// ── Scenario 1: single tool round-trip ─────────────────────────────────

#[tokio::test]
async fn test_single_tool_round_trip() {
    let h = harness().await;
    std::fs::create_dir_all(h.projects_root.join("p")).unwrap();
    std::fs::write(h.projects_root.join("p/README.md"), "hello world").unwrap();

    h.engine
        .registry()
        .create(Agent::new("dev", "Developer").with_project("p"))
        .await
        .unwrap();
    h.factory.script(
        "dev",
        &["Let me look. @read_file(README.md)", "The file says hello."],
    );

    let mut rx = h.bus.subscribe();
    let reply = h
        .engine
        .chat("dev", "Read README.md", sink())
        .await
        .unwrap();
    assert_eq!(reply, "The file says hello.");

    let kinds = drain_kinds(&mut rx);
    assert!(kinds.contains(&"agent:tool:start".to_string()));
    assert!(kinds.contains(&"agent:tool:result".to_string()));

    // The continuation prompt fed at depth 1 carries the tool results.
    let prompts = h.factory.prompts_for("dev");
    assert_eq!(prompts.len(), 2);
    let continuation = &prompts[1].last().unwrap().content;
    assert!(continuation
        .starts_with("[TOOL RESULTS]\n--- read_file(README.md) ---\nhello world\n\n"));

    // One completed turn, despite the recursive continuation.
    let view = h.engine.registry().view("dev").await.unwrap();
    assert_eq!(view.metrics.total_messages, 1);
    assert_eq!(view.status, AgentStatus::Idle);

    // History: user, assistant, tool-result continuation, assistant.
    let history = h.engine.history("dev").await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(matches!(
        history[2].kind,
        swarmllm::agent::HistoryKind::ToolResult { .. }
    ));
}

// ── Scenario 2: leader delegation with per-target serialisation ────────

#[tokio::test]
async fn test_leader_delegation_with_serialisation() {
    let h = harness().await;
    let registry = h.engine.registry();
    registry
        .create(Agent::new("lead", "Architect").as_leader())
        .await
        .unwrap();
    registry.create(Agent::new("d1", "D1")).await.unwrap();
    registry.create(Agent::new("d2", "D2")).await.unwrap();

    h.factory.script(
        "lead",
        &[
            "Splitting up: @delegate(D1, \"task one\") @delegate(D1, \"task two\") @delegate(D2, \"task three\")",
            "synthesis",
        ],
    );
    h.factory.script("d1", &["one done", "two done"]);
    h.factory.script("d2", &["three done"]);

    let reply = h.engine.chat("lead", "Build the feature", sink()).await.unwrap();
    assert_eq!(reply, "synthesis");

    // Synthesis continuation carries the three sections in textual order.
    let prompts = h.factory.prompts_for("lead");
    assert_eq!(prompts.len(), 2);
    let continuation = &prompts[1].last().unwrap().content;
    let one = continuation.find("--- Response from D1 ---\none done").unwrap();
    let two = continuation.find("--- Response from D1 ---\ntwo done").unwrap();
    let three = continuation.find("--- Response from D2 ---\nthree done").unwrap();
    assert!(one < two && two < three);

    // D1 ran its two tasks sequentially on its lane.
    let d1_history = h.engine.history("d1").await.unwrap();
    let tasks: Vec<&str> = d1_history
        .iter()
        .filter(|e| e.content.starts_with("[TASK from"))
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(
        tasks,
        vec![
            "[TASK from Architect]: task one",
            "[TASK from Architect]: task two"
        ]
    );

    // Delegation todos were added and marked done with timestamps.
    let d1 = registry.view("d1").await.unwrap();
    assert_eq!(d1.todos.len(), 2);
    assert!(d1.todos.iter().all(|t| t.done && t.completed_at.is_some()));
    assert!(d1.todos[0].text.starts_with("[From Architect]"));

    // Continuations do not count as turns: the leader completed one.
    let lead = registry.view("lead").await.unwrap();
    assert_eq!(lead.metrics.total_messages, 1);
    // Each delegated task is a real turn for the target.
    assert_eq!(d1.metrics.total_messages, 2);
}

// ── Scenario 3: code-block immunity ────────────────────────────────────

#[tokio::test]
async fn test_code_block_immunity() {
    let h = harness().await;
    let registry = h.engine.registry();
    registry
        .create(Agent::new("lead", "Architect").as_leader())
        .await
        .unwrap();
    registry.create(Agent::new("d1", "Developer")).await.unwrap();
    registry.create(Agent::new("qa", "QA")).await.unwrap();

    h.factory.script(
        "lead",
        &[
            "Here is how delegation works:\n```\n@delegate(Developer, \"example\")\n```\nNow for real: @delegate(QA, \"run tests\")",
            "synthesis",
        ],
    );
    h.factory.script("qa", &["tests pass"]);

    let mut rx = h.bus.subscribe();
    h.engine.chat("lead", "Explain and test", sink()).await.unwrap();

    let mut delegation_targets = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SwarmEvent::Delegation { to_name, .. } = event {
            delegation_targets.push(to_name);
        }
    }
    assert_eq!(delegation_targets, vec!["QA"]);
    assert!(h.engine.history("d1").await.unwrap().is_empty());
}

// ── Unresolvable delegation target ─────────────────────────────────────

#[tokio::test]
async fn test_missing_delegation_target() {
    let h = harness().await;
    h.engine
        .registry()
        .create(Agent::new("lead", "Architect").as_leader())
        .await
        .unwrap();
    h.factory
        .script("lead", &["@delegate(Ghost, \"boo\")", "synthesis"]);

    let reply = h.engine.chat("lead", "go", sink()).await.unwrap();
    assert_eq!(reply, "synthesis");

    let prompts = h.factory.prompts_for("lead");
    let continuation = &prompts[1].last().unwrap().content;
    assert!(continuation.contains("--- Error from Ghost ---\nAgent \"Ghost\" not found in swarm"));
    assert!(continuation.contains("Some agents reported errors."));
}

// ── Scenario 5: cancellation mid-stream ────────────────────────────────

#[tokio::test]
async fn test_cancellation_mid_stream() {
    let h = harness().await;
    h.engine
        .registry()
        .create(Agent::new("dev", "Developer"))
        .await
        .unwrap();
    h.factory.script_hang("dev", &["chunk one ", "chunk two "]);

    let seen = Arc::new(AtomicUsize::new(0));
    let notify = Arc::new(tokio::sync::Notify::new());
    let callback: swarmllm::engine::ChunkCallback = {
        let seen = Arc::clone(&seen);
        let notify = Arc::clone(&notify);
        Arc::new(move |_chunk: &str| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                notify.notify_one();
            }
        })
    };

    let engine = h.engine.clone();
    let turn = tokio::spawn(async move { engine.chat("dev", "go", callback).await });

    notify.notified().await;
    let mut rx = h.bus.subscribe();
    h.engine.stop("dev").await.unwrap();

    let result = turn.await.unwrap();
    assert!(matches!(result, Err(SwarmError::Cancelled)));
    assert_eq!(result.unwrap_err().to_string(), "stopped by user");

    let kinds = drain_kinds(&mut rx);
    assert!(kinds.contains(&"agent:stopped".to_string()));

    // Idle, not errored; the user message survived, no assistant entry.
    let view = h.engine.registry().view("dev").await.unwrap();
    assert_eq!(view.status, AgentStatus::Idle);
    assert_eq!(view.metrics.errors, 0);
    let history = h.engine.history("dev").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "go");
}

// ── Scenario 6: error-report escalation ────────────────────────────────

#[tokio::test]
async fn test_error_report_escalation() {
    let h = harness().await;
    std::fs::create_dir_all(h.projects_root.join("p")).unwrap();
    h.engine
        .registry()
        .create(Agent::new("dev", "Developer").with_project("p"))
        .await
        .unwrap();
    h.factory.script(
        "dev",
        &[
            "@report_error(Missing dependency X)",
            "I am blocked on a missing dependency.",
        ],
    );

    let mut rx = h.bus.subscribe();
    let reply = h.engine.chat("dev", "install it", sink()).await.unwrap();
    assert_eq!(reply, "I am blocked on a missing dependency.");

    let mut report = None;
    while let Ok(event) = rx.try_recv() {
        if let SwarmEvent::ErrorReport { description, .. } = event {
            report = Some(description);
        }
    }
    assert_eq!(report.as_deref(), Some("Missing dependency X"));

    let prompts = h.factory.prompts_for("dev");
    let continuation = &prompts[1].last().unwrap().content;
    assert!(continuation.contains("Error report recorded: Missing dependency X"));
    assert!(continuation.contains("You reported an error."));
}

// ── Boundary: empty model output ───────────────────────────────────────

#[tokio::test]
async fn test_empty_output_is_not_an_error() {
    let h = harness().await;
    std::fs::create_dir_all(h.projects_root.join("p")).unwrap();
    h.engine
        .registry()
        .create(Agent::new("dev", "Developer").with_project("p"))
        .await
        .unwrap();
    h.factory.script("dev", &[""]);

    let reply = h.engine.chat("dev", "hello?", sink()).await.unwrap();
    assert_eq!(reply, "");

    let history = h.engine.history("dev").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "");
    let view = h.engine.registry().view("dev").await.unwrap();
    assert_eq!(view.metrics.total_messages, 1);
    // No tool processing happened: only one stream was opened.
    assert_eq!(h.factory.prompts_for("dev").len(), 1);
}

// ── Boundary: recursion depth limit ────────────────────────────────────

#[tokio::test]
async fn test_depth_limit_skips_processing() {
    let projects = TempDir::new().unwrap();
    std::fs::create_dir_all(projects.path().join("p")).unwrap();
    std::fs::write(projects.path().join("p/a.txt"), "data").unwrap();

    let bus = EventBus::new(1024);
    let registry = Arc::new(AgentRegistry::new(bus.clone()));
    let config = SwarmConfig {
        projects_root: projects.path().to_path_buf(),
        max_depth: 2,
        ..SwarmConfig::default()
    };
    let factory = Arc::new(ScriptedFactory::new());
    let engine = SwarmEngine::new(registry, bus, config)
        .with_client_factory(Arc::clone(&factory) as Arc<dyn ClientFactory>);

    engine
        .registry()
        .create(Agent::new("dev", "Developer").with_project("p"))
        .await
        .unwrap();
    // Every response asks for another tool call; the limit must cut it off.
    factory.script(
        "dev",
        &[
            "@read_file(a.txt)",
            "@read_file(a.txt)",
            "@read_file(a.txt)",
            "@read_file(a.txt)",
        ],
    );

    let reply = engine.chat("dev", "loop forever", sink()).await.unwrap();
    // Depth 0 and 1 process tools; depth 2 returns the raw text.
    assert_eq!(reply, "@read_file(a.txt)");
    assert_eq!(factory.prompts_for("dev").len(), 3);
}

// ── Broadcast and handoff ──────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_reaches_every_agent() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("a", "Alpha")).await.unwrap();
    h.engine.registry().create(Agent::new("b", "Beta")).await.unwrap();
    h.factory.script("a", &["alpha here"]);
    h.factory.script("b", &["beta here"]);

    let outcomes = h.engine.broadcast("status?", sink()).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(h.engine.history("a").await.unwrap().len(), 2);
    assert_eq!(h.engine.history("b").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_handoff_carries_source_context() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("src", "Source")).await.unwrap();
    h.engine.registry().create(Agent::new("dst", "Target")).await.unwrap();
    h.factory.script("src", &["I learned many things."]);
    h.factory.script("dst", &["taking over"]);

    h.engine.chat("src", "investigate", sink()).await.unwrap();

    let mut rx = h.bus.subscribe();
    let reply = h
        .engine
        .handoff("src", "dst", "continue the investigation", sink())
        .await
        .unwrap();
    assert_eq!(reply, "taking over");
    assert!(drain_kinds(&mut rx).contains(&"agent:handoff".to_string()));

    let history = h.engine.history("dst").await.unwrap();
    assert!(history[0]
        .content
        .starts_with("[HANDOFF from Source]: continue the investigation"));
    assert!(history[0].content.contains("I learned many things."));
}

// ── History and todo primitives ────────────────────────────────────────

#[tokio::test]
async fn test_clear_history_is_idempotent() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("a", "Alpha")).await.unwrap();
    h.factory.script("a", &["response"]);
    h.engine.chat("a", "hello", sink()).await.unwrap();

    h.engine.clear_history("a").await.unwrap();
    assert!(h.engine.history("a").await.unwrap().is_empty());
    h.engine.clear_history("a").await.unwrap();
    assert!(h.engine.history("a").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_truncate_history_drops_after_index() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("a", "Alpha")).await.unwrap();
    h.factory.script("a", &["one", "two"]);
    h.engine.chat("a", "first", sink()).await.unwrap();
    h.engine.chat("a", "second", sink()).await.unwrap();
    assert_eq!(h.engine.history("a").await.unwrap().len(), 4);

    let remaining = h.engine.truncate_history("a", 1).await.unwrap();
    assert_eq!(remaining, 2);
    let history = h.engine.history("a").await.unwrap();
    assert_eq!(history[1].content, "one");
}

#[tokio::test]
async fn test_toggle_todo_twice_is_identity() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("a", "Alpha")).await.unwrap();
    let todo = h.engine.add_todo("a", "write tests").await.unwrap();

    let once = h.engine.toggle_todo("a", &todo.id).await.unwrap();
    assert!(once.done);
    // A manual toggle never sets the engine-completion timestamp.
    assert!(once.completed_at.is_none());

    let twice = h.engine.toggle_todo("a", &todo.id).await.unwrap();
    assert_eq!(twice.done, todo.done);
    assert_eq!(twice.completed_at, todo.completed_at);
}

#[tokio::test]
async fn test_execute_todo_marks_done() {
    let h = harness().await;
    h.engine.registry().create(Agent::new("a", "Alpha")).await.unwrap();
    h.factory.script("a", &["did the thing"]);
    let todo = h.engine.add_todo("a", "do the thing").await.unwrap();

    let reply = h.engine.execute_todo("a", &todo.id, sink()).await.unwrap();
    assert_eq!(reply, "did the thing");

    let view = h.engine.registry().view("a").await.unwrap();
    let done = view.todos.iter().find(|t| t.id == todo.id).unwrap();
    assert!(done.done);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_chat_with_unknown_agent() {
    let h = harness().await;
    let err = h.engine.chat("nobody", "hi", sink()).await.unwrap_err();
    assert!(matches!(err, SwarmError::NotFound(_)));
}
