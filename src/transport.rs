//! HTTP transport bound to a base URL.

use crate::context::TestContext;
use crate::error::{ConfigFault, RestelError};
use crate::model::{HttpMethod, HttpRequest, RequestInfo, ResponseInfo};
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::{Client, Method as ReqMethod};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Sends definition requests relative to one base URL, expanding
/// `{{ name }}` placeholders from the run context.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Fails with [`ConfigFault::BaseUrlInvalid`] when `base_url` is
    /// blank or not a URL.
    pub fn new(
        client: Client,
        base_url: &str,
        run: &str,
    ) -> Result<Self, RestelError> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(RestelError::config(ConfigFault::BaseUrlInvalid, run));
        }
        let base_url = Url::parse(trimmed).map_err(|_| {
            RestelError::config(ConfigFault::BaseUrlInvalid, trimmed)
        })?;
        Ok(Self {
            client,
            base_url,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Headers added to every request that does not set them.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the base URL; absolute URLs pass
    /// through.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        if path.contains("://") {
            return Url::parse(path).context(format!("Invalid URL: {path}"));
        }
        if path.is_empty() {
            return Ok(self.base_url.clone());
        }
        let normalized = path.trim_start_matches('/');
        self.base_url.join(normalized).context(format!(
            "Failed to join base_url '{}' with path '{path}'",
            self.base_url
        ))
    }

    #[instrument(skip(self, request, context), fields(url = %request.url, method = ?request.method))]
    pub async fn send(
        &self,
        request: &HttpRequest,
        context: &TestContext,
    ) -> Result<(RequestInfo, ResponseInfo)> {
        let vars = context.values();
        let url = self.resolve_url(&expand_variables(&request.url, vars))?;

        let mut headers = request.headers.clone();
        for (key, value) in &self.headers {
            if !headers.contains_key(key) {
                headers.insert(key.clone(), value.clone());
            }
        }
        let headers: HashMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k, expand_variables(&v, vars)))
            .collect();

        let mut req_builder = self
            .client
            .request(convert_method(request.method), url.clone())
            .timeout(self.timeout);

        for (name, value) in &headers {
            req_builder = req_builder.header(name, value);
        }

        if !request.query.is_empty() {
            let query: HashMap<String, String> = request
                .query
                .iter()
                .map(|(k, v)| (k.clone(), expand_variables(v, vars)))
                .collect();
            req_builder = req_builder.query(&query);
        }

        let mut body_str = None;
        if let Some(body) = &request.body {
            let body_json = serde_json::to_string(body)?;
            let expanded_body = expand_variables(&body_json, vars);
            body_str = Some(expanded_body.clone());
            req_builder = req_builder
                .header("Content-Type", "application/json")
                .body(expanded_body);
        }

        let req_info = RequestInfo {
            method: request.method.as_str().to_string(),
            url: url.to_string(),
            headers,
            body: body_str,
        };

        debug!("Sending request to {}", url);
        let response =
            req_builder.send().await.context("Failed to send request")?;
        let status = response.status().as_u16();
        debug!("Received response with status: {}", status);

        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.to_string(), v.to_string());
            }
        }
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let res_info = ResponseInfo {
            status,
            headers: response_headers,
            body: if body.is_empty() { None } else { Some(body) },
        };
        Ok((req_info, res_info))
    }
}

fn convert_method(method: HttpMethod) -> ReqMethod {
    match method {
        HttpMethod::Get => ReqMethod::GET,
        HttpMethod::Post => ReqMethod::POST,
        HttpMethod::Put => ReqMethod::PUT,
        HttpMethod::Delete => ReqMethod::DELETE,
        HttpMethod::Patch => ReqMethod::PATCH,
        HttpMethod::Head => ReqMethod::HEAD,
        HttpMethod::Options => ReqMethod::OPTIONS,
    }
}

/// Expand `{{ key }}` placeholders from the run context. Unknown keys
/// are left as written.
pub fn expand_variables(
    text: &str,
    vars: &indexmap::IndexMap<String, Value>,
) -> String {
    static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\{\{\s*(.+?)\s*\}\}")
            .expect("failed to compile placeholder regex")
    });

    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
