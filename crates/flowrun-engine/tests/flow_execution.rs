use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use flowrun_core::config::{AppConfig, FanOutPolicy};
use flowrun_core::credential::Credential;
use flowrun_core::flow::{
    Edge, Flow, Node, Variable, NODE_AI_AGENT, NODE_CONDITION, NODE_DATABASE, NODE_DELAY,
    NODE_HTTP_REQUEST, NODE_SEND_MESSAGE, NODE_SET_VARIABLE, NODE_TRIGGER_TELEGRAM,
    NODE_TRIGGER_WEBHOOK,
};
use flowrun_core::types::Variables;
use flowrun_core::ErrorKind;
use flowrun_engine::{FlowEngine, RunOptions};
use flowrun_store::SqliteConnector;
use flowrun_test_utils::{
    credential_store, database_credential, linear_flow, openai_credential, vars, MockLlmClient,
    MockSqlConnector,
};
use tokio_util::sync::CancellationToken;

fn engine_with(config: AppConfig, llm: Arc<MockLlmClient>, credentials: Vec<Credential>) -> FlowEngine {
    FlowEngine::new(
        config,
        credential_store(credentials),
        llm,
        Arc::new(MockSqlConnector::new()),
    )
}

fn engine() -> FlowEngine {
    engine_with(AppConfig::default(), Arc::new(MockLlmClient::new()), vec![])
}

fn set_var(id: &str, name: &str, value: Value) -> Node {
    Node::new(id, NODE_SET_VARIABLE)
        .with("name", json!(name))
        .with("value", value)
}

fn branching_flow() -> Flow {
    Flow::new("branch")
        .with_node(Node::new("a", NODE_TRIGGER_WEBHOOK))
        .with_node(Node::new("b", NODE_SET_VARIABLE).with("name", json!("x")).with("value", json!("{{seed}}")))
        .with_node(
            Node::new("c", NODE_CONDITION).with(
                "conditions",
                json!([{"field": "x", "operator": "gt", "value": 3}]),
            ),
        )
        .with_node(set_var("yes", "branch", json!("big")))
        .with_node(set_var("no", "branch", json!("small")))
        .with_edge(Edge::new("a", "b"))
        .with_edge(Edge::new("b", "c"))
        .with_edge(Edge::from_handle("c", "true", "yes"))
        .with_edge(Edge::from_handle("c", "false", "no"))
}

#[tokio::test]
async fn test_empty_flow_has_no_trigger() {
    let llm = Arc::new(MockLlmClient::new());
    let engine = engine_with(AppConfig::default(), llm.clone(), vec![]);

    let err = engine.execute(&Flow::new("empty"), Variables::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTriggerFound);

    let no_trigger = Flow::new("f")
        .with_node(Node::new("ai", NODE_AI_AGENT).with("api_key", json!("sk")))
        .with_node(set_var("s", "x", json!(1)));
    let err = engine.execute(&no_trigger, vars(json!({"message": "hi"}))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoTriggerFound);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_condition_selects_branch() {
    let flow = branching_flow();

    let big = engine().execute(&flow, vars(json!({"seed": 5}))).await.unwrap();
    assert_eq!(big.variables["branch"], json!("big"));
    assert_eq!(big.output, vars(json!({"branch": "big"})));
    assert!(big.steps.iter().all(|s| s.node_id != "no"));

    let small = engine().execute(&flow, vars(json!({"seed": 2}))).await.unwrap();
    assert_eq!(small.variables["branch"], json!("small"));
    assert!(small.steps.iter().all(|s| s.node_id != "yes"));
    assert!(!small.variables.contains_key("_handle"));
}

#[tokio::test]
async fn test_set_variable_visible_downstream() {
    let flow = linear_flow(vec![
        set_var("b", "x", json!(5)),
        set_var("c", "y", json!("{{x}}")),
        Node::new("d", NODE_SEND_MESSAGE).with("message", json!("y is {{y}}, z is {{z}}")),
    ]);
    let result = engine().execute(&flow, Variables::new()).await.unwrap();

    assert_eq!(result.variables["y"], json!("5"));
    assert_eq!(result.output["message"], json!("y is 5, z is {{z}}"));
    assert_eq!(result.outbound.len(), 1);
    assert_eq!(result.outbound[0].node_id, "d");
}

#[tokio::test]
async fn test_cycle_rejected_before_any_handler() {
    let llm = Arc::new(MockLlmClient::new());
    let engine = engine_with(AppConfig::default(), llm.clone(), vec![]);
    let flow = Flow::new("loop")
        .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
        .with_node(Node::new("a", NODE_AI_AGENT).with("api_key", json!("sk")))
        .with_node(Node::new("b", NODE_AI_AGENT).with("api_key", json!("sk")))
        .with_edge(Edge::new("t", "a"))
        .with_edge(Edge::new("a", "b"))
        .with_edge(Edge::new("b", "a"));

    let err = engine.execute(&flow, vars(json!({"message": "hi"}))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cycle);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delay_capped_at_five_minutes() {
    let flow = linear_flow(vec![Node::new("d", NODE_DELAY)
        .with("duration", json!(10))
        .with("unit", json!("hours"))]);

    let start = tokio::time::Instant::now();
    engine().execute(&flow, Variables::new()).await.unwrap();
    assert!(start.elapsed() <= Duration::from_secs(301));
}

#[tokio::test]
async fn test_cancelled_delay_aborts_run() {
    let flow = linear_flow(vec![
        Node::new("d", NODE_DELAY).with("duration", json!(30)),
        set_var("after", "x", json!(1)),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = engine()
        .execute_with(&flow, Variables::new(), RunOptions::default().cancel(cancel))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancellation);
    assert_eq!(err.node_id(), Some("d"));
}

#[tokio::test]
async fn test_missing_url_fails_with_node_label() {
    let flow = linear_flow(vec![
        Node::new("h", NODE_HTTP_REQUEST).with_label("Call CRM"),
        set_var("after", "x", json!(1)),
    ]);
    let err = engine().execute(&flow, Variables::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.node_id(), Some("h"));
    assert!(err.to_string().contains("Call CRM"));
}

#[tokio::test]
async fn test_fan_out_runs_depth_first_in_edge_order() {
    let flow = Flow::new("fan")
        .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
        .with_node(set_var("left", "l", json!(1)))
        .with_node(set_var("left_child", "lc", json!(1)))
        .with_node(set_var("right", "r", json!(1)))
        .with_node(set_var("join", "j", json!(1)))
        .with_edge(Edge::new("t", "left"))
        .with_edge(Edge::new("t", "right"))
        .with_edge(Edge::new("left", "left_child"))
        .with_edge(Edge::new("left_child", "join"))
        .with_edge(Edge::new("right", "join"));

    let result = engine().execute(&flow, Variables::new()).await.unwrap();
    let order: Vec<_> = result.steps.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(order, vec!["t", "left", "left_child", "join", "right"]);
    assert_eq!(result.output, vars(json!({"r": 1})));
}

#[tokio::test]
async fn test_continue_siblings_records_failures() {
    let mut config = AppConfig::default();
    config.engine.fan_out = FanOutPolicy::ContinueSiblings;
    let engine = engine_with(config, Arc::new(MockLlmClient::new()), vec![]);

    let flow = Flow::new("fan")
        .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
        .with_node(Node::new("bad", NODE_HTTP_REQUEST))
        .with_node(set_var("skipped", "s", json!(1)))
        .with_node(set_var("ok", "o", json!(1)))
        .with_edge(Edge::new("t", "bad"))
        .with_edge(Edge::new("bad", "skipped"))
        .with_edge(Edge::new("t", "ok"));

    let result = engine.execute(&flow, Variables::new()).await.unwrap();
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].node_id, "bad");
    assert!(!result.variables.contains_key("s"));
    assert_eq!(result.variables["o"], json!(1));

    let strict = engine_with(AppConfig::default(), Arc::new(MockLlmClient::new()), vec![]);
    assert!(strict.execute(&flow, Variables::new()).await.is_err());
}

#[tokio::test]
async fn test_first_trigger_wins_and_flow_variables_seed_scope() {
    let flow = Flow::new("two triggers")
        .with_variable(Variable::new("greeting", json!("hi")))
        .with_variable(Variable::new("name", json!("nobody")))
        .with_node(Node::new("tg", NODE_TRIGGER_TELEGRAM))
        .with_node(Node::new("wh", NODE_TRIGGER_WEBHOOK))
        .with_node(Node::new("msg", NODE_SEND_MESSAGE).with("message", json!("{{greeting}} {{name}}")))
        .with_edge(Edge::new("tg", "msg"));

    let result = engine().execute(&flow, vars(json!({"name": "Ann"}))).await.unwrap();
    assert_eq!(result.steps[0].node_id, "tg");
    assert_eq!(result.output["message"], json!("hi Ann"));
}

#[tokio::test]
async fn test_ai_reply_flows_into_message() {
    let llm = Arc::new(MockLlmClient::new().with_reply("Sure, 3pm works."));
    let engine = engine_with(
        AppConfig::default(),
        llm.clone(),
        vec![openai_credential("oa", "sk-test")],
    );
    let flow = linear_flow(vec![
        Node::new("ai", NODE_AI_AGENT).with("credential_id", json!("oa")),
        Node::new("reply", NODE_SEND_MESSAGE)
            .with("message", json!("Bot: {{ai_response}}"))
            .with("reply_to_trigger", json!(true)),
    ]);

    let result = engine
        .execute(&flow, vars(json!({"message": "Can we meet at 3?"})))
        .await
        .unwrap();
    assert_eq!(result.outbound[0].text, "Bot: Sure, 3pm works.");
    assert!(result.outbound[0].reply_to_trigger);
    assert_eq!(llm.requests()[0].messages[1].content, "Can we meet at 3?");
}

#[tokio::test]
async fn test_database_node_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crm.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE contacts (id INTEGER PRIMARY KEY, email TEXT NOT NULL, plan TEXT);",
        )
        .unwrap();
    }
    let db = path.to_string_lossy().into_owned();

    let engine = FlowEngine::new(
        AppConfig::default(),
        credential_store(vec![database_credential("crm", &db)]),
        Arc::new(MockLlmClient::new()),
        Arc::new(SqliteConnector::new()),
    );

    let flow = linear_flow(vec![
        Node::new("ins", NODE_DATABASE)
            .with("credential_id", json!("crm"))
            .with("operation", json!("insert"))
            .with("table", json!("contacts"))
            .with("values", json!({"email": "{{email}}", "plan": "free"})),
        Node::new("upd", NODE_DATABASE)
            .with("credential_id", json!("crm"))
            .with("operation", json!("update"))
            .with("table", json!("contacts"))
            .with("values", json!({"plan": "pro"}))
            .with("where", json!([{"column": "email", "value": "{{email}}"}])),
        Node::new("sel", NODE_DATABASE)
            .with("credential_id", json!("crm"))
            .with("operation", json!("select"))
            .with("table", json!("contacts"))
            .with("where", json!([{"column": "plan", "operator": "eq", "value": "pro"}])),
    ]);

    let result = engine
        .execute(&flow, vars(json!({"email": "ann@example.com"})))
        .await
        .unwrap();
    assert_eq!(result.variables["inserted"]["email"], json!("ann@example.com"));
    assert_eq!(result.variables["rows_affected"], json!(1));
    assert_eq!(result.output["count"], json!(1));
    assert_eq!(result.output["rows"][0]["plan"], json!("pro"));
}

#[tokio::test]
async fn test_oversized_http_timeout_is_rejected_without_a_call() {
    let flow = linear_flow(vec![Node::new("h", NODE_HTTP_REQUEST)
        .with("url", json!("http://127.0.0.1:9/"))
        .with("timeout", json!(1e20))]);

    let err = engine().execute(&flow, Variables::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.node_id(), Some("h"));
}

#[tokio::test]
async fn test_database_failure_carries_node_label() {
    let sql = Arc::new(MockSqlConnector::new().with_error("disk I/O error"));
    let engine = FlowEngine::new(
        AppConfig::default(),
        credential_store(vec![database_credential("crm", "/data/crm.db")]),
        Arc::new(MockLlmClient::new()),
        sql.clone(),
    );
    let flow = linear_flow(vec![
        Node::new("q", NODE_DATABASE)
            .with_label("Load contacts")
            .with("credential_id", json!("crm"))
            .with("operation", json!("select"))
            .with("table", json!("contacts")),
        set_var("after", "x", json!(1)),
    ]);

    let err = engine.execute(&flow, Variables::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalCall);
    assert_eq!(err.node_id(), Some("q"));
    assert!(err.to_string().contains("Load contacts"));
    assert_eq!(sql.statements().len(), 1);
}

#[tokio::test]
async fn test_http_node_uses_engine_client() {
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().route(
        "/whoami",
        get(|headers: HeaderMap| async move {
            Json(json!({
                "agent": headers.get("user-agent").and_then(|v| v.to_str().ok())
            }))
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .user_agent("flowrun-test/1.0")
        .build()
        .unwrap();
    let engine = engine().with_http_client(client);
    let flow = linear_flow(vec![Node::new("h", NODE_HTTP_REQUEST)
        .with("url", json!(format!("http://{}/whoami", addr)))]);

    let result = engine.execute(&flow, Variables::new()).await.unwrap();
    assert_eq!(result.output["status_code"], json!(200));
    assert_eq!(result.output["body"]["agent"], json!("flowrun-test/1.0"));
}

#[tokio::test]
async fn test_unlabeled_edge_not_followed_after_branch() {
    let flow = branching_flow()
        .with_node(set_var("always", "always", json!(true)))
        .with_edge(Edge::new("c", "always"));

    let result = engine()
        .execute(&flow, vars(json!({"seed": 5})))
        .await
        .unwrap();
    assert_eq!(result.variables["branch"], json!("big"));
    assert!(result.variables.get("always").is_none());
    assert!(result.steps.iter().all(|s| s.node_id != "always"));
}

