//! Typed assertions over resolved operands.

use crate::capture::FieldExtractor;
use crate::context::TestContext;
use crate::error::Result;
use crate::matcher::{render, MatcherRegistry};
use crate::model::{AssertType, Assertion};
use crate::reference::{self, ReferenceResolver, VariableReference};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Recorded result of one assertion. A failed assertion is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionOutcome {
    pub assert_type: AssertType,
    pub actual: String,
    pub expected: Option<String>,
    pub resolved_actual: Option<Value>,
    pub resolved_expected: Option<Value>,
    pub passed: bool,
    pub message: Option<String>,
}

pub struct AssertionEvaluator<'a> {
    resolver: &'a ReferenceResolver<'a>,
    matchers: &'a MatcherRegistry,
    extractor: &'a dyn FieldExtractor,
}

impl<'a> AssertionEvaluator<'a> {
    pub fn new(
        resolver: &'a ReferenceResolver<'a>,
        matchers: &'a MatcherRegistry,
        extractor: &'a dyn FieldExtractor,
    ) -> Self {
        Self {
            resolver,
            matchers,
            extractor,
        }
    }

    /// Validate the operands of `assertion`, resolve them and run the
    /// matcher registered for its type.
    pub fn evaluate(
        &self,
        assertion: &Assertion,
        context: &TestContext,
    ) -> Result<AssertionOutcome> {
        let expected_operand = assertion
            .expected
            .as_deref()
            .filter(|e| !e.is_empty());

        let actual_refs = self.validate(&assertion.actual)?;
        let expected_refs = match expected_operand {
            Some(operand) => self.validate(operand)?,
            None => Vec::new(),
        };

        let matcher = self.matchers.get(assertion.assert_type)?;

        let resolved_actual =
            self.resolve(&assertion.actual, &actual_refs, context);
        let resolved_expected = expected_operand
            .and_then(|operand| self.resolve(operand, &expected_refs, context));

        let verdict =
            matcher.check(resolved_actual.as_ref(), resolved_expected.as_ref());
        match &verdict {
            Ok(()) => debug!(
                "Assertion {} on '{}' passed",
                assertion.assert_type, assertion.actual
            ),
            Err(msg) => warn!(
                "Assertion {} on '{}' failed: {}",
                assertion.assert_type, assertion.actual, msg
            ),
        }

        Ok(AssertionOutcome {
            assert_type: assertion.assert_type,
            actual: assertion.actual.clone(),
            expected: assertion.expected.clone(),
            resolved_actual,
            resolved_expected,
            passed: verdict.is_ok(),
            message: verdict.err(),
        })
    }

    /// Evaluate every assertion. Structural errors abort; failed
    /// assertions are collected.
    pub fn evaluate_all(
        &self,
        assertions: &[Assertion],
        context: &TestContext,
    ) -> Result<Vec<AssertionOutcome>> {
        assertions
            .iter()
            .map(|assertion| self.evaluate(assertion, context))
            .collect()
    }

    fn validate(&self, operand: &str) -> Result<Vec<VariableReference>> {
        if reference::is_variable(operand) {
            self.resolver.validate_operand(operand)
        } else {
            Ok(Vec::new())
        }
    }

    /// Turn an operand into a value. `refs` are the validated
    /// references of `operand`, in order of appearance.
    fn resolve(
        &self,
        operand: &str,
        refs: &[VariableReference],
        context: &TestContext,
    ) -> Option<Value> {
        if refs.is_empty() {
            return Some(parse_literal(operand));
        }
        if let ([single], Some(_)) = (refs, reference::as_single_reference(operand)) {
            return self.lookup(single, context);
        }

        let mut remaining = refs.iter();
        let text = reference::interpolate(operand, |_| {
            remaining
                .next()
                .and_then(|r| self.lookup(r, context))
                .map(|v| render(&v))
        });
        Some(Value::String(text))
    }

    fn lookup(
        &self,
        reference: &VariableReference,
        context: &TestContext,
    ) -> Option<Value> {
        self.extractor
            .extract(reference)
            .or_else(|| context.get(&reference.canonical_key()).ok().cloned())
    }
}

/// JSON scalars (`200`, `true`, `null`) parse as such; anything else
/// is a string.
fn parse_literal(operand: &str) -> Value {
    match serde_json::from_str::<Value>(operand.trim()) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => value,
        _ => Value::String(operand.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CapturedPayloads, Exchange};
    use crate::error::RestelError;
    use crate::model::{BaseConfig, DefinitionSet};
    use crate::reference::SelfReferencePolicy;
    use crate::registry::tests::{definition, execution, suite};
    use crate::registry::{DefinitionRegistry, DefinitionStore};
    use serde_json::json;

    fn store() -> DefinitionStore {
        DefinitionStore::from_set(DefinitionSet {
            config: BaseConfig::default(),
            suites: vec![suite("suite")],
            definitions: vec![definition("login", &[]), definition("profile", &[])],
            executions: vec![
                execution("login_exec", "login", &[]),
                execution("profile_exec", "profile", &["login_exec"]),
            ],
        })
        .unwrap()
    }

    fn captures() -> CapturedPayloads {
        let mut captures = CapturedPayloads::new();
        captures.record(
            "login_exec",
            "login",
            Exchange {
                request: json!({"body": {"user": "bob"}}),
                response: json!({"status": 200, "body": {"token": "t-1", "count": 3}}),
            },
        );
        captures
    }

    fn assertion(ty: AssertType, actual: &str, expected: Option<&str>) -> Assertion {
        Assertion {
            actual: actual.into(),
            expected: expected.map(String::from),
            assert_type: ty,
        }
    }

    #[test]
    fn test_equal_on_extracted_status() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let ctx = TestContext::new("profile_exec");

        let outcome = evaluator
            .evaluate(
                &assertion(AssertType::Equal, "{login_exec.login.response.status}", Some("200")),
                &ctx,
            )
            .unwrap();
        assert!(outcome.passed, "{:?}", outcome.message);
        assert_eq!(outcome.resolved_actual, Some(json!(200)));
        assert_eq!(outcome.resolved_expected, Some(json!(200)));
    }

    #[test]
    fn test_failed_assertion_is_recorded_not_raised() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let ctx = TestContext::new("profile_exec");

        let outcome = evaluator
            .evaluate(
                &assertion(AssertType::Greater, "{login_exec.login.response.body.count}", Some("10")),
                &ctx,
            )
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.message.unwrap().contains("greater"));
    }

    #[test]
    fn test_invalid_reference_in_expected_is_an_error() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let ctx = TestContext::new("profile_exec");

        let err = evaluator
            .evaluate(
                &assertion(AssertType::Equal, "1", Some("{login_exec.login.headers.x}")),
                &ctx,
            )
            .unwrap_err();
        assert!(matches!(err, RestelError::InvalidReference { .. }));
    }

    #[test]
    fn test_reference_falls_back_to_context() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = CapturedPayloads::new();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let mut ctx = TestContext::new("profile_exec");
        ctx.put_all([(
            "login_exec.login.response.body.token".to_string(),
            json!("from-context"),
        )])
        .unwrap();

        let outcome = evaluator
            .evaluate(
                &assertion(AssertType::NotNull, "{login_exec.login.response.body.token}", None),
                &ctx,
            )
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.resolved_actual, Some(json!("from-context")));

        let outcome = evaluator
            .evaluate(
                &assertion(AssertType::Null, "{login_exec.login.response.body.missing}", None),
                &ctx,
            )
            .unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn test_embedded_references_interpolate() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let ctx = TestContext::new("profile_exec");

        let outcome = evaluator
            .evaluate(
                &assertion(
                    AssertType::Equal,
                    "Bearer {login_exec.login.response.body.token}",
                    Some("Bearer t-1"),
                ),
                &ctx,
            )
            .unwrap();
        assert!(outcome.passed, "{:?}", outcome.message);
    }

    #[test]
    fn test_json_literal_operands_compare_as_text() {
        let store = store();
        let current = store.execution_definition("profile_exec").unwrap();
        let resolver = ReferenceResolver::new(&store, current);
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let evaluator = AssertionEvaluator::new(&resolver, &matchers, &captures);
        let ctx = TestContext::new("profile_exec");

        let outcome = evaluator
            .evaluate(
                &assertion(AssertType::Equal, r#"{"ok":true}"#, Some(r#"{"ok":true}"#)),
                &ctx,
            )
            .unwrap();
        assert!(outcome.passed, "{:?}", outcome.message);
        assert_eq!(outcome.resolved_actual, Some(json!(r#"{"ok":true}"#)));
    }

    #[test]
    fn test_self_reference_requires_policy() {
        let store = store();
        let current = store.execution_definition("login_exec").unwrap();
        let matchers = MatcherRegistry::with_defaults();
        let captures = captures();
        let ctx = TestContext::new("login_exec");
        let check = assertion(AssertType::True, "{login_exec.login.response.status}", None);

        let strict = ReferenceResolver::new(&store, current);
        let err = AssertionEvaluator::new(&strict, &matchers, &captures)
            .evaluate(&check, &ctx)
            .unwrap_err();
        assert!(matches!(err, RestelError::InvalidReference { .. }));

        let lenient = ReferenceResolver::new(&store, current)
            .with_policy(SelfReferencePolicy::Allow);
        let outcome = AssertionEvaluator::new(&lenient, &matchers, &captures)
            .evaluate(&check, &ctx)
            .unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn test_literal_parsing() {
        assert_eq!(parse_literal("200"), json!(200));
        assert_eq!(parse_literal("true"), json!(true));
        assert_eq!(parse_literal("null"), Value::Null);
        assert_eq!(parse_literal("qa"), json!("qa"));
        assert_eq!(parse_literal("[1]"), json!("[1]"));
    }
}
