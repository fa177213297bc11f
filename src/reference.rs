//! Cross-execution variable references.
//!
//! A reference is written `{execution.definition.request.path}` or
//! `{execution.definition.response.path}`. Validation only looks at
//! the loaded definition graphs; values are read later through a
//! [`crate::capture::FieldExtractor`].

use crate::error::{ReferenceFault, RestelError, Result};
use crate::graph;
use crate::model::ExecutionGroup;
use crate::registry::DefinitionRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

const NS_SEPARATOR: char = '.';
const REQUEST: &str = "request";
const RESPONSE: &str = "response";

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([\w-]+(?:\.[^{}\s]+)+)\s*\}")
        .expect("failed to compile variable regex")
});

/// Whether `operand` contains at least one variable reference.
pub fn is_variable(operand: &str) -> bool {
    VARIABLE_RE.is_match(operand)
}

/// The bodies of every reference in `operand`, delimiters stripped.
pub fn find_references(operand: &str) -> impl Iterator<Item = &str> {
    VARIABLE_RE
        .captures_iter(operand)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// When `operand` is exactly one reference, its body.
pub fn as_single_reference(operand: &str) -> Option<&str> {
    let caps = VARIABLE_RE.captures(operand.trim())?;
    let whole = caps.get(0)?;
    if whole.as_str().len() == operand.trim().len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Replace each reference in `operand` with `render(body)`, keeping
/// the original token when `render` yields nothing.
pub fn interpolate<F>(operand: &str, mut render: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    VARIABLE_RE
        .replace_all(operand, |caps: &regex::Captures| {
            render(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadScope {
    Request,
    Response,
}

impl PayloadScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => REQUEST,
            Self::Response => RESPONSE,
        }
    }
}

/// A reference that passed graph validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableReference {
    pub execution: String,
    pub definition: String,
    pub scope: PayloadScope,
    /// Dot-separated path inside the payload; empty for the whole
    /// payload.
    pub path: String,
}

impl VariableReference {
    /// `execution.definition.scope[.path]`, the name under which the
    /// value may also be bound in a context.
    pub fn canonical_key(&self) -> String {
        let mut key = format!(
            "{}.{}.{}",
            self.execution,
            self.definition,
            self.scope.as_str()
        );
        if !self.path.is_empty() {
            key.push(NS_SEPARATOR);
            key.push_str(&self.path);
        }
        key
    }
}

impl fmt::Display for VariableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.canonical_key())
    }
}

/// Whether a reference may name the execution it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfReferencePolicy {
    #[default]
    Reject,
    Allow,
}

/// Validates references from the point of view of one execution
/// group.
pub struct ReferenceResolver<'a> {
    registry: &'a dyn DefinitionRegistry,
    current: &'a ExecutionGroup,
    policy: SelfReferencePolicy,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        registry: &'a dyn DefinitionRegistry,
        current: &'a ExecutionGroup,
    ) -> Self {
        Self {
            registry,
            current,
            policy: SelfReferencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SelfReferencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn current(&self) -> &ExecutionGroup {
        self.current
    }

    /// Validate every reference contained in `operand`.
    pub fn validate_operand(
        &self,
        operand: &str,
    ) -> Result<Vec<VariableReference>> {
        find_references(operand).map(|body| self.validate(body)).collect()
    }

    /// Validate a reference body (delimiters already stripped).
    pub fn validate(&self, body: &str) -> Result<VariableReference> {
        let (execution, remainder) = body
            .split_once(NS_SEPARATOR)
            .ok_or_else(|| self.reject(body, body, ReferenceFault::Malformed))?;

        if execution == self.current.name {
            if self.policy == SelfReferencePolicy::Reject {
                return Err(self.reject(
                    body,
                    execution,
                    ReferenceFault::SelfReference,
                ));
            }
        } else if !self.is_ancestor(execution) {
            return Err(self.reject(
                body,
                execution,
                ReferenceFault::ExecutionUnreachable,
            ));
        }

        let (definition, field_path) =
            remainder.split_once(NS_SEPARATOR).ok_or_else(|| {
                self.reject(body, remainder, ReferenceFault::Malformed)
            })?;

        if !self.definition_in_tree(execution, definition) {
            return Err(self.reject(
                body,
                definition,
                ReferenceFault::DefinitionNotFound,
            ));
        }

        let (scope, path) = split_namespace(field_path).ok_or_else(|| {
            self.reject(body, field_path, ReferenceFault::MissingNamespace)
        })?;

        debug!(
            "Validated reference '{}' from execution '{}'",
            body, self.current.name
        );
        Ok(VariableReference {
            execution: execution.to_string(),
            definition: definition.to_string(),
            scope,
            path: path.to_string(),
        })
    }

    fn is_ancestor(&self, execution: &str) -> bool {
        graph::contains(&self.current.depends_on, execution, |name| {
            self.registry
                .execution_definition(name)
                .map(|group| group.depends_on.as_slice())
        })
    }

    /// Search the definition tree of `execution` for `definition`.
    fn definition_in_tree(&self, execution: &str, definition: &str) -> bool {
        let Some(group) = self.registry.execution_definition(execution) else {
            return false;
        };
        let root = std::slice::from_ref(&group.test_definition);
        graph::contains(root, definition, |name| {
            self.registry
                .test_definition(name)
                .map(|def| def.depends_on.as_slice())
        })
    }

    fn reject(
        &self,
        pattern: &str,
        segment: &str,
        fault: ReferenceFault,
    ) -> RestelError {
        RestelError::InvalidReference {
            pattern: pattern.to_string(),
            segment: segment.to_string(),
            run: self.current.name.clone(),
            fault,
        }
    }
}

/// Split `request...`/`response...` (any case) into scope and the
/// path that follows it.
fn split_namespace(field_path: &str) -> Option<(PayloadScope, &str)> {
    [PayloadScope::Request, PayloadScope::Response]
        .into_iter()
        .find_map(|scope| {
            let prefix = scope.as_str();
            let head = field_path.get(..prefix.len())?;
            head.eq_ignore_ascii_case(prefix).then(|| {
                let rest = &field_path[prefix.len()..];
                (scope, rest.trim_start_matches(NS_SEPARATOR))
            })
        })
}
