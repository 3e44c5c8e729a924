use std::time::Duration;

use reqwest::Method;
use serde_json::{Map, Value};
use tracing::debug;

use flowrun_core::credential::{AuthType, CustomApiCredential};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::node_config::HttpRequestConfig;
use flowrun_core::types::Variables;

use super::{cancellable, NodeServices};
use crate::context::ExecutionContext;
use crate::interpolate::value_to_text;

/// Perform one outbound HTTP call and capture status, body and headers.
pub async fn run(
    cfg: &HttpRequestConfig,
    ctx: &ExecutionContext<'_>,
    services: &NodeServices,
) -> Result<Variables> {
    let url_template = cfg
        .url()
        .ok_or_else(|| FlowError::Configuration("URL is required for HTTP request".into()))?;
    let method = Method::from_bytes(cfg.method().as_bytes())
        .map_err(|e| FlowError::Configuration(format!("invalid HTTP method: {}", e)))?;

    let api = match cfg.credential_id() {
        Some(id) => Some(services.credentials.resolve::<CustomApiCredential>(id).await?),
        None => None,
    };

    let mut url = ctx.interpolate(url_template);
    let mut headers: Vec<(String, String)> = Vec::new();
    if let Some(api) = &api {
        if !url.contains("://") && !api.base_url.is_empty() {
            url = join_url(&api.base_url, &url);
        }
        headers.extend(api.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for (name, value) in &cfg.headers {
        if let Some(text) = value.as_str() {
            headers.push((name.clone(), ctx.interpolate(text)));
        }
    }

    let query: Vec<(String, String)> = cfg
        .query_params
        .iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => ctx.interpolate(s),
                other => value_to_text(other),
            };
            (k.clone(), text)
        })
        .collect();

    let body = match &cfg.body {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(ctx.interpolate(s)).filter(|b| !b.is_empty()),
        Some(other) => Some(ctx.interpolate_value(other).to_string()),
    };
    if body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }

    let timeout = cfg.timeout(Duration::from_secs(services.config.engine.http_timeout_secs));
    let mut req = services.http.request(method.clone(), &url).timeout(timeout);
    if !query.is_empty() {
        req = req.query(&query);
    }
    for (name, value) in &headers {
        req = req.header(name.as_str(), value.as_str());
    }
    if let Some(api) = &api {
        req = match api.auth_type {
            AuthType::None => req,
            AuthType::Bearer => req.bearer_auth(&api.auth_value),
            AuthType::ApiKey => req.header("X-API-Key", api.auth_value.as_str()),
            AuthType::Basic => match api.auth_value.split_once(':') {
                Some((user, pass)) => req.basic_auth(user, Some(pass)),
                None => req.basic_auth(&api.auth_value, None::<&str>),
            },
        };
    }
    if let Some(body) = body {
        req = req.body(body);
    }

    debug!(method = %method, url = %url, timeout_secs = timeout.as_secs_f64(), "Sending HTTP request");
    let response = cancellable(&ctx.cancel, async {
        req.send().await.map_err(|e| FlowError::Http(e.to_string()))
    })
    .await?;

    let status = response.status().as_u16();
    let mut response_headers = Map::new();
    for (name, value) in response.headers() {
        let entry = response_headers
            .entry(name.as_str())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ));
        }
    }

    let bytes = cancellable(&ctx.cancel, async {
        response
            .bytes()
            .await
            .map_err(|e| FlowError::Http(format!("failed to read response: {}", e)))
    })
    .await?;
    let body = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    debug!(status, bytes = bytes.len(), "HTTP response received");
    Ok([
        ("status_code".to_string(), Value::from(status)),
        ("body".to_string(), body),
        ("headers".to_string(), Value::Object(response_headers)),
    ]
    .into_iter()
    .collect())
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
