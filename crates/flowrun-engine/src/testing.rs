use std::sync::Arc;

use flowrun_core::config::AppConfig;
use flowrun_core::credential::Credential;
use flowrun_core::traits::{LlmClient, SqlConnector};
use flowrun_test_utils::{credential_store, MockLlmClient, MockSqlConnector};

use crate::credentials::CredentialResolver;
use crate::nodes::NodeServices;

pub(crate) fn services() -> NodeServices {
    services_with(
        Arc::new(MockLlmClient::new()),
        Arc::new(MockSqlConnector::new()),
        vec![],
    )
}

pub(crate) fn services_with(
    llm: Arc<dyn LlmClient>,
    sql: Arc<dyn SqlConnector>,
    credentials: Vec<Credential>,
) -> NodeServices {
    NodeServices {
        credentials: CredentialResolver::new(credential_store(credentials)),
        llm,
        sql,
        http: reqwest::Client::new(),
        config: AppConfig::default(),
    }
}
