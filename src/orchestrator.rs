//! Drives one execution group from context build to pass/fail.

use crate::assertion::{AssertionEvaluator, AssertionOutcome};
use crate::capture::{CapturedPayloads, FieldExtractor};
use crate::context::TestContext;
use crate::error::{ConfigFault, RestelError, Result};
use crate::function::FunctionExecutor;
use crate::matcher::MatcherRegistry;
use crate::model::{ExecutionGroup, StepResult, TestDefinition};
use crate::reference::{ReferenceResolver, SelfReferencePolicy};
use crate::registry::DefinitionRegistry;
use crate::runner::{DefinitionJob, DefinitionRunner, HttpDefinitionRunner};
use crate::transport::HttpTransport;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Progress of a run. Transitions are strictly linear; an error
/// leaves the run at its last completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Uninitialized,
    ContextReady,
    FunctionsApplied,
    AssertionsChecked,
    Delegated,
    Passed,
    Failed,
}

/// Result of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub execution: String,
    pub state: RunState,
    pub passed: bool,
    pub context: TestContext,
    pub assertions: Vec<AssertionOutcome>,
    pub steps: Vec<StepResult>,
    #[serde(skip)]
    pub captures: CapturedPayloads,
    pub duration_ms: u64,
}

/// Shared, read-only collaborators for any number of runs.
pub struct Engine {
    registry: Arc<dyn DefinitionRegistry>,
    runner: Arc<dyn DefinitionRunner>,
    matchers: Arc<MatcherRegistry>,
    policy: SelfReferencePolicy,
    client: Client,
}

impl Engine {
    pub fn builder(registry: Arc<dyn DefinitionRegistry>) -> EngineBuilder {
        EngineBuilder {
            registry,
            runner: None,
            matchers: None,
            policy: SelfReferencePolicy::default(),
            client: None,
        }
    }

    pub fn registry(&self) -> &dyn DefinitionRegistry {
        self.registry.as_ref()
    }

    /// A fresh orchestrator for one run of `execution_name`.
    pub fn orchestrator(&self, execution_name: &str) -> ExecutionOrchestrator<'_> {
        ExecutionOrchestrator::new(self, execution_name)
    }

    /// Run `execution_name` to completion. References to ancestor
    /// executions are read through `extractor`.
    pub async fn execute_test_run(
        &self,
        execution_name: &str,
        extractor: &dyn FieldExtractor,
    ) -> Result<RunOutcome> {
        self.orchestrator(execution_name).execute(extractor).await
    }
}

pub struct EngineBuilder {
    registry: Arc<dyn DefinitionRegistry>,
    runner: Option<Arc<dyn DefinitionRunner>>,
    matchers: Option<Arc<MatcherRegistry>>,
    policy: SelfReferencePolicy,
    client: Option<Client>,
}

impl EngineBuilder {
    pub fn runner(mut self, runner: Arc<dyn DefinitionRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn matchers(mut self, matchers: Arc<MatcherRegistry>) -> Self {
        self.matchers = Some(matchers);
        self
    }

    pub fn self_reference(mut self, policy: SelfReferencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            registry: self.registry,
            runner: self
                .runner
                .unwrap_or_else(|| Arc::new(HttpDefinitionRunner::new())),
            matchers: self
                .matchers
                .unwrap_or_else(|| Arc::new(MatcherRegistry::with_defaults())),
            policy: self.policy,
            client: self.client.unwrap_or_default(),
        }
    }
}

struct Bound<'e> {
    group: &'e ExecutionGroup,
    definition: &'e TestDefinition,
    transport: HttpTransport,
}

/// Owns the context of a single run. Not shared between runs.
pub struct ExecutionOrchestrator<'e> {
    engine: &'e Engine,
    execution_name: String,
    state: RunState,
    context: TestContext,
    bound: Option<Bound<'e>>,
}

impl<'e> ExecutionOrchestrator<'e> {
    fn new(engine: &'e Engine, execution_name: &str) -> Self {
        Self {
            engine,
            execution_name: execution_name.to_string(),
            state: RunState::Uninitialized,
            context: TestContext::new(execution_name),
            bound: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &TestContext {
        &self.context
    }

    /// Resolve the base URL and the named definitions, then merge
    /// suite params followed by execution params into the context.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != RunState::Uninitialized {
            return Ok(());
        }
        let registry = self.engine.registry.as_ref();
        let config = registry.base_config();

        let transport = HttpTransport::new(
            self.engine.client.clone(),
            &config.base_url,
            &self.execution_name,
        )?
        .with_headers(config.headers.clone())
        .with_timeout(Duration::from_secs(config.timeout));

        let group = registry
            .execution_definition(&self.execution_name)
            .ok_or_else(|| {
                RestelError::config(
                    ConfigFault::UnknownExecution,
                    &self.execution_name,
                )
            })?;
        let definition =
            registry.test_definition(&group.test_definition).ok_or_else(|| {
                RestelError::config(
                    ConfigFault::UnknownDefinition,
                    &group.test_definition,
                )
            })?;
        let suite = registry.test_suite(&group.test_suite).ok_or_else(|| {
            RestelError::config(ConfigFault::UnknownSuite, &group.test_suite)
        })?;

        self.context.put_all(
            suite.params.iter().map(|(k, v)| (k.clone(), v.clone())),
        )?;
        self.context.put_all(
            group.params.iter().map(|(k, v)| (k.clone(), v.clone())),
        )?;
        debug!(
            "Context for '{}' ready with {} entries",
            self.execution_name,
            self.context.len()
        );

        self.bound = Some(Bound {
            group,
            definition,
            transport,
        });
        self.state = RunState::ContextReady;
        Ok(())
    }

    /// Walk the remaining transitions. Fails fast on the first
    /// error; a failing assertion ends the run as `Failed` without
    /// delegating.
    #[instrument(skip(self, extractor), fields(execution = %self.execution_name))]
    pub async fn execute(
        mut self,
        extractor: &dyn FieldExtractor,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        info!("Starting execution: {}", self.execution_name);

        self.initialize()?;
        let engine = self.engine;
        let Some(bound) = self.bound.take() else {
            return Err(RestelError::config(
                ConfigFault::UnknownExecution,
                &self.execution_name,
            ));
        };

        let resolver = ReferenceResolver::new(engine.registry.as_ref(), bound.group)
            .with_policy(engine.policy);

        FunctionExecutor::new(&resolver)
            .execute_all(&bound.group.functions, &mut self.context)?;
        self.state = RunState::FunctionsApplied;

        let mut assertions = Vec::new();
        if !bound.group.assertions.is_empty() {
            assertions = AssertionEvaluator::new(
                &resolver,
                engine.matchers.as_ref(),
                extractor,
            )
            .evaluate_all(&bound.group.assertions, &self.context)?;
        }
        self.state = RunState::AssertionsChecked;

        let failed = assertions.iter().filter(|a| !a.passed).count();
        if failed > 0 {
            warn!(
                "{} of {} assertions failed for '{}'",
                failed,
                assertions.len(),
                self.execution_name
            );
            self.state = RunState::Failed;
            return Ok(self.finish(assertions, Default::default(), start));
        }

        let report = engine
            .runner
            .run(DefinitionJob {
                execution: bound.group,
                definition: bound.definition,
                registry: engine.registry.as_ref(),
                transport: &bound.transport,
                matchers: engine.matchers.as_ref(),
                context: &mut self.context,
            })
            .await
            .map_err(RestelError::from_delegation)?;
        self.state = RunState::Delegated;

        self.state = if report.success {
            RunState::Passed
        } else {
            RunState::Failed
        };
        Ok(self.finish(assertions, report, start))
    }

    fn finish(
        self,
        assertions: Vec<AssertionOutcome>,
        report: crate::runner::DefinitionReport,
        start: Instant,
    ) -> RunOutcome {
        let outcome = RunOutcome {
            passed: self.state == RunState::Passed,
            execution: self.execution_name,
            state: self.state,
            context: self.context,
            assertions,
            steps: report.steps,
            captures: report.captures,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Execution finished: {} ({} ms) - {:?}",
            outcome.execution, outcome.duration_ms, outcome.state
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Exchange;
    use crate::model::{
        AssertType, Assertion, BaseConfig, DefinitionSet, FunctionOperation,
        RestelFunction,
    };
    use crate::registry::tests::{definition, execution, suite};
    use crate::registry::DefinitionStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records how often it was called and echoes a fixed verdict.
    struct StubRunner {
        success: bool,
        calls: AtomicUsize,
    }

    impl StubRunner {
        fn new(success: bool) -> Arc<Self> {
            Arc::new(Self {
                success,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DefinitionRunner for StubRunner {
        async fn run(
            &self,
            job: DefinitionJob<'_>,
        ) -> anyhow::Result<crate::runner::DefinitionReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            job.context
                .put_all([("delegated".to_string(), json!(job.definition.name))])?;
            Ok(crate::runner::DefinitionReport {
                success: self.success,
                ..Default::default()
            })
        }
    }

    fn login_set() -> DefinitionSet {
        let mut qa = suite("smoke");
        qa.params.insert("env".into(), json!("qa"));

        let mut login_exec = execution("login_exec", "login", &[]);
        login_exec.test_suite = "smoke".into();
        login_exec.params.insert("user".into(), json!("bob"));
        login_exec.assertions.push(Assertion {
            actual: "{login_exec.login.response.status}".into(),
            expected: Some("200".into()),
            assert_type: AssertType::Equal,
        });

        DefinitionSet {
            config: BaseConfig {
                base_url: "http://localhost:9".into(),
                ..Default::default()
            },
            suites: vec![qa],
            definitions: vec![definition("login", &[])],
            executions: vec![login_exec],
        }
    }

    fn engine(
        set: DefinitionSet,
        runner: Arc<StubRunner>,
        policy: SelfReferencePolicy,
    ) -> Engine {
        let store = DefinitionStore::from_set(set).unwrap();
        Engine::builder(Arc::new(store))
            .runner(runner)
            .self_reference(policy)
            .build()
    }

    fn login_captures(status: u16) -> CapturedPayloads {
        let mut captures = CapturedPayloads::new();
        captures.record(
            "login_exec",
            "login",
            Exchange {
                request: json!({}),
                response: json!({ "status": status }),
            },
        );
        captures
    }

    #[test]
    fn test_initialize_merges_suite_then_execution_params() {
        let engine = engine(login_set(), StubRunner::new(true), SelfReferencePolicy::Allow);
        let mut run = engine.orchestrator("login_exec");
        run.initialize().unwrap();

        assert_eq!(run.state(), RunState::ContextReady);
        let entries: Vec<(&String, &serde_json::Value)> = run.context().iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (&"env".to_string(), &json!("qa")));
        assert_eq!(entries[1], (&"user".to_string(), &json!("bob")));
    }

    #[test]
    fn test_suite_and_execution_param_collision() {
        let mut set = login_set();
        set.suites[0].params.insert("a".into(), json!(1));
        set.executions[0].params.insert("a".into(), json!(2));
        let engine = engine(set, StubRunner::new(true), SelfReferencePolicy::Allow);

        let mut run = engine.orchestrator("login_exec");
        let err = run.initialize().unwrap_err();
        assert!(matches!(err, RestelError::NameCollision { ref key, .. } if key == "a"));
        assert_eq!(run.state(), RunState::Uninitialized);
    }

    #[test]
    fn test_initialize_config_faults() {
        let mut blank = login_set();
        blank.config.base_url = "  ".into();
        let mut no_def = login_set();
        no_def.executions[0].test_definition = "missing_def".into();
        no_def.executions[0].assertions.clear();
        let mut no_suite = login_set();
        no_suite.executions[0].test_suite = "missing_suite".into();

        let cases = [
            (blank, "login_exec", ConfigFault::BaseUrlInvalid),
            (login_set(), "nope", ConfigFault::UnknownExecution),
            (no_def, "login_exec", ConfigFault::UnknownDefinition),
            (no_suite, "login_exec", ConfigFault::UnknownSuite),
        ];
        for (set, name, expected) in cases {
            let engine = engine(set, StubRunner::new(true), SelfReferencePolicy::Allow);
            let err = engine.orchestrator(name).initialize().unwrap_err();
            match err {
                RestelError::InvalidConfig { fault, .. } => assert_eq!(fault, expected),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_login_exec_end_to_end() {
        let runner = StubRunner::new(true);
        let engine = engine(login_set(), runner.clone(), SelfReferencePolicy::Allow);

        let outcome = engine
            .execute_test_run("login_exec", &login_captures(200))
            .await
            .unwrap();

        assert!(outcome.passed);
        assert_eq!(outcome.state, RunState::Passed);
        assert_eq!(outcome.assertions.len(), 1);
        assert_eq!(outcome.assertions[0].resolved_actual, Some(json!(200)));
        assert_eq!(outcome.context.get("env").unwrap(), &json!("qa"));
        assert_eq!(outcome.context.get("user").unwrap(), &json!("bob"));
        assert_eq!(outcome.context.get("delegated").unwrap(), &json!("login"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_self_reference_rejected_by_default() {
        let runner = StubRunner::new(true);
        let engine = engine(login_set(), runner.clone(), SelfReferencePolicy::Reject);

        let err = engine
            .execute_test_run("login_exec", &login_captures(200))
            .await
            .unwrap_err();
        assert!(matches!(err, RestelError::InvalidReference { .. }));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_assertion_skips_delegation() {
        let runner = StubRunner::new(true);
        let engine = engine(login_set(), runner.clone(), SelfReferencePolicy::Allow);

        let outcome = engine
            .execute_test_run("login_exec", &login_captures(500))
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.state, RunState::Failed);
        assert!(!outcome.assertions[0].passed);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delegated_failure_fails_run() {
        let mut set = login_set();
        set.executions[0].assertions.clear();
        let engine = engine(set, StubRunner::new(false), SelfReferencePolicy::Reject);

        let outcome = engine
            .execute_test_run("login_exec", &CapturedPayloads::new())
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.state, RunState::Failed);
    }

    #[tokio::test]
    async fn test_runner_error_keeps_its_variant() {
        let mut set = login_set();
        set.executions[0].assertions.clear();
        set.executions[0]
            .params
            .insert("delegated".into(), json!("preset"));
        let engine = engine(set, StubRunner::new(true), SelfReferencePolicy::Reject);

        let err = engine
            .execute_test_run("login_exec", &CapturedPayloads::new())
            .await
            .unwrap_err();
        match err {
            RestelError::NameCollision { key, run } => {
                assert_eq!(key, "delegated");
                assert_eq!(run, "login_exec");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_keep_separate_contexts() {
        let mut set = login_set();
        let mut alice_exec = execution("alice_exec", "login", &[]);
        alice_exec.test_suite = "smoke".into();
        alice_exec.params.insert("user".into(), json!("alice"));
        set.executions.push(alice_exec);

        let runner = StubRunner::new(true);
        let engine = Arc::new(engine(set, runner.clone(), SelfReferencePolicy::Allow));

        let bob = tokio::spawn({
            let engine = engine.clone();
            async move {
                let captures = login_captures(200);
                engine.execute_test_run("login_exec", &captures).await
            }
        });
        let alice = tokio::spawn({
            let engine = engine.clone();
            async move {
                let captures = CapturedPayloads::new();
                engine.execute_test_run("alice_exec", &captures).await
            }
        });

        let bob = bob.await.unwrap().unwrap();
        let alice = alice.await.unwrap().unwrap();

        assert!(bob.passed && alice.passed);
        assert_eq!(bob.context.run_name(), "login_exec");
        assert_eq!(alice.context.run_name(), "alice_exec");
        assert_eq!(bob.context.get("user").unwrap(), &json!("bob"));
        assert_eq!(alice.context.get("user").unwrap(), &json!("alice"));
        for outcome in [&bob, &alice] {
            assert_eq!(outcome.context.len(), 3);
            assert_eq!(outcome.context.get("delegated").unwrap(), &json!("login"));
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_function_results_join_context() {
        let mut set = login_set();
        set.executions[0].assertions.clear();
        set.executions[0].functions.insert(
            "old_user".into(),
            RestelFunction {
                operation: FunctionOperation::Remove,
                data: "user".into(),
            },
        );
        let engine = engine(set, StubRunner::new(true), SelfReferencePolicy::Reject);

        let outcome = engine
            .execute_test_run("login_exec", &CapturedPayloads::new())
            .await
            .unwrap();
        assert!(outcome.passed);
        assert!(!outcome.context.contains("user"));
        assert_eq!(outcome.context.get("old_user").unwrap(), &json!("bob"));
    }

    #[tokio::test]
    async fn test_add_function_aborts_run() {
        let mut set = login_set();
        set.executions[0].assertions.clear();
        set.executions[0].functions.insert(
            "added".into(),
            RestelFunction {
                operation: FunctionOperation::Add,
                data: "x".into(),
            },
        );
        let runner = StubRunner::new(true);
        let engine = engine(set, runner.clone(), SelfReferencePolicy::Reject);

        let err = engine
            .execute_test_run("login_exec", &CapturedPayloads::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RestelError::NotImplemented { .. }));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }
}
