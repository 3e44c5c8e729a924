use std::sync::Arc;

use serde_json::Value;

use flowrun_core::credential::*;
use flowrun_core::flow::{Edge, Flow, Node, NODE_TRIGGER_WEBHOOK};
use flowrun_core::traits::CredentialStore;
use flowrun_core::types::Variables;
use flowrun_store::MemoryCredentialStore;

pub const TEST_AGENT: &str = "agent-test";

/// Build a variable map from a JSON object literal.
pub fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Variables::new(),
    }
}

/// A webhook trigger with id `trigger`, followed by `nodes` chained in order.
pub fn linear_flow(nodes: Vec<Node>) -> Flow {
    let mut flow = Flow::new("test flow")
        .with_agent(TEST_AGENT)
        .with_node(Node::new("trigger", NODE_TRIGGER_WEBHOOK));
    let mut prev = "trigger".to_string();
    for node in nodes {
        let id = node.id.clone();
        flow = flow.with_node(node).with_edge(Edge::new(prev, id.clone()));
        prev = id;
    }
    flow
}

pub fn openai_credential(id: &str, api_key: &str) -> Credential {
    payload_credential(
        id,
        CredentialType::OpenAi,
        &OpenAiCredential {
            api_key: api_key.to_string(),
            organization: None,
            base_url: None,
        },
    )
}

pub fn database_credential(id: &str, database: &str) -> Credential {
    payload_credential(
        id,
        CredentialType::Database,
        &DatabaseCredential {
            database: database.to_string(),
            ..Default::default()
        },
    )
}

pub fn custom_api_credential(id: &str, payload: CustomApiCredential) -> Credential {
    payload_credential(id, CredentialType::CustomApi, &payload)
}

fn payload_credential(
    id: &str,
    credential_type: CredentialType,
    payload: &impl serde::Serialize,
) -> Credential {
    let config = serde_json::to_string(payload).unwrap_or_default();
    Credential {
        id: id.to_string(),
        agent_id: TEST_AGENT.to_string(),
        name: id.to_string(),
        credential_type,
        config,
        created_at: None,
        updated_at: None,
    }
}

/// An in-memory credential store holding `credentials`.
pub fn credential_store(credentials: Vec<Credential>) -> Arc<dyn CredentialStore> {
    Arc::new(credentials.into_iter().collect::<MemoryCredentialStore>())
}
