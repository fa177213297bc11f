//! Test definition execution

use crate::capture::{get_value_by_path, CapturedPayloads, Exchange};
use crate::context::TestContext;
use crate::graph;
use crate::matcher::{Matcher, MatcherRegistry};
use crate::model::*;
use crate::registry::DefinitionRegistry;
use crate::transport::{expand_variables, HttpTransport};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Everything a runner needs to execute one execution group's test
/// definition.
pub struct DefinitionJob<'a> {
    pub execution: &'a ExecutionGroup,
    pub definition: &'a TestDefinition,
    pub registry: &'a dyn DefinitionRegistry,
    pub transport: &'a HttpTransport,
    pub matchers: &'a MatcherRegistry,
    pub context: &'a mut TestContext,
}

#[derive(Debug, Clone, Default)]
pub struct DefinitionReport {
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub captures: CapturedPayloads,
}

/// The test-definition execution path an orchestrator delegates to.
#[async_trait]
pub trait DefinitionRunner: Send + Sync {
    async fn run(&self, job: DefinitionJob<'_>) -> Result<DefinitionReport>;
}

/// Runs a definition and its `depends_on` tree over HTTP, ancestors
/// first, stopping at the first failing definition.
#[derive(Debug, Default)]
pub struct HttpDefinitionRunner;

impl HttpDefinitionRunner {
    pub fn new() -> Self {
        Self
    }

    /// Check `response` against `expect`; returns every mismatch.
    fn check_expectations(
        expect: &ResponseExpectation,
        response: &ResponseInfo,
        matchers: &MatcherRegistry,
        context: &TestContext,
    ) -> Result<Vec<String>> {
        let mut errors = Vec::new();

        if !expect.status.is_empty() && !expect.status.contains(&response.status)
        {
            errors.push(format!(
                "status {} not in accepted codes {:?}",
                response.status, expect.status
            ));
        }

        if !expect.headers.is_empty() {
            let matcher = resolve_matcher(matchers, expect.header_matcher.as_deref())?;
            for (name, expected) in &expect.headers {
                let expected =
                    Value::String(expand_variables(expected, context.values()));
                let actual = response
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| Value::String(v.clone()));
                match actual {
                    Some(actual) => {
                        if let Err(msg) = matcher.check(Some(&actual), Some(&expected)) {
                            errors.push(format!("header '{name}': {msg}"));
                        }
                    }
                    None => errors.push(format!("header '{name}' missing")),
                }
            }
        }

        let body = response.body.as_deref().unwrap_or_default();

        if !expect.json.is_empty() {
            match serde_json::from_str::<Value>(body) {
                Ok(json) => {
                    let matcher = resolve_matcher(matchers, expect.matcher.as_deref())?;
                    for (path, expected) in &expect.json {
                        let expected = expand_json(expected, context);
                        let actual = get_value_by_path(&json, path);
                        if let Err(msg) = matcher.check(actual, Some(&expected)) {
                            errors.push(format!("json path '{path}': {msg}"));
                        }
                    }
                }
                Err(e) => {
                    errors.push(format!("response is not valid JSON: {e}"));
                }
            }
        }

        for text in &expect.contains {
            let text = expand_variables(text, context.values());
            if !body.contains(&text) {
                errors.push(format!("response body does not contain '{text}'"));
            }
        }

        Ok(errors)
    }

    /// Bind `save` entries from the response body into the context.
    fn save_variables(
        definition: &TestDefinition,
        response: &ResponseInfo,
        context: &mut TestContext,
    ) -> Result<()> {
        if definition.save.is_empty() {
            return Ok(());
        }

        let body = response.body.as_deref().unwrap_or_default();
        let json_body: Value = serde_json::from_str(body)
            .context("Failed to parse response as JSON")?;

        let mut saved = Vec::with_capacity(definition.save.len());
        for (var_name, json_path) in &definition.save {
            let value = get_value_by_path(&json_body, json_path).ok_or_else(
                || anyhow!("JSON path '{json_path}' not found in response"),
            )?;
            debug!("Saved variable '{}' with value: {:?}", var_name, value);
            saved.push((var_name.clone(), value.clone()));
        }
        context.put_all(saved)?;
        Ok(())
    }

    async fn run_one(
        &self,
        definition: &TestDefinition,
        job: &mut DefinitionJob<'_>,
        captures: &mut CapturedPayloads,
    ) -> Result<StepResult> {
        let step_start = Instant::now();

        let (req_info, res_info) = job
            .transport
            .send(&definition.request, &*job.context)
            .await
            .with_context(|| {
                format!("request for definition '{}' failed", definition.name)
            })?;

        captures.record(
            job.execution.name.as_str(),
            definition.name.as_str(),
            Exchange::from_http(&req_info, &res_info),
        );

        let errors = Self::check_expectations(
            &definition.expect,
            &res_info,
            job.matchers,
            &*job.context,
        )?;
        for err in &errors {
            error!("{} (definition: {})", err, definition.name);
        }

        let success = errors.is_empty();
        if success {
            Self::save_variables(definition, &res_info, &mut *job.context)
                .with_context(|| {
                    format!("saving variables of '{}' failed", definition.name)
                })?;
        }

        Ok(StepResult {
            name: definition.name.clone(),
            success,
            error: (!success).then(|| errors.join("; ")),
            request: req_info,
            response: Some(res_info),
            duration_ms: step_start.elapsed().as_millis() as u64,
        })
    }
}

/// The named matcher when one is set, EQUAL otherwise.
fn resolve_matcher<'m>(
    matchers: &'m MatcherRegistry,
    name: Option<&str>,
) -> crate::error::Result<&'m dyn Matcher> {
    match name {
        Some(name) => matchers.get_named(name),
        None => matchers.get(AssertType::Equal),
    }
}

/// Expand placeholders inside string leaves of an expected value.
fn expand_json(value: &Value, context: &TestContext) -> Value {
    match value {
        Value::String(s) => Value::String(expand_variables(s, context.values())),
        other => other.clone(),
    }
}

#[async_trait]
impl DefinitionRunner for HttpDefinitionRunner {
    #[instrument(skip(self, job), fields(execution = %job.execution.name, definition = %job.definition.name))]
    async fn run(&self, mut job: DefinitionJob<'_>) -> Result<DefinitionReport> {
        let registry = job.registry;
        let root = job.definition;
        let order = graph::post_order(&root.name, |name| {
            registry
                .test_definition(name)
                .map(|d| d.depends_on.as_slice())
        })
        .map_err(|at| anyhow!("definition dependency cycle at '{at}'"))?;

        let mut report = DefinitionReport {
            success: true,
            ..Default::default()
        };

        for (idx, name) in order.iter().enumerate() {
            let definition = registry
                .test_definition(name)
                .ok_or_else(|| anyhow!("unknown test definition '{name}'"))?;
            info!(
                "Running definition {}/{}: {}",
                idx + 1,
                order.len(),
                definition.name
            );

            let step = self
                .run_one(definition, &mut job, &mut report.captures)
                .await?;
            let failed = !step.success;
            report.steps.push(step);

            if failed {
                warn!("Stopping execution '{}' due to definition failure", job.execution.name);
                report.success = false;
                break;
            }
        }

        Ok(report)
    }
}
