//! Definition and report data model.
//!
//! Definitions are authored as YAML documents (see
//! [`DefinitionSet`]); graphs between them are expressed by name and
//! resolved through [`crate::registry::DefinitionRegistry`].

use crate::error::RestelError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A full definitions document: base config, suites, test
/// definitions and the executions binding them together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionSet {
    #[serde(default)]
    pub config: BaseConfig,
    #[serde(default)]
    pub suites: Vec<TestSuite>,
    #[serde(default)]
    pub definitions: Vec<TestDefinition>,
    #[serde(default)]
    pub executions: Vec<ExecutionGroup>,
}

impl DefinitionSet {
    /// Deserialize a definition set from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the definition set to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Append another set's definitions. The base URL of `self` wins
    /// when both are set; default headers are merged without
    /// overwriting.
    pub fn merge(&mut self, other: DefinitionSet) {
        if self.config.base_url.trim().is_empty() {
            self.config.base_url = other.config.base_url;
        }
        for (k, v) in other.config.headers {
            self.config.headers.entry(k).or_insert(v);
        }
        self.suites.extend(other.suites);
        self.definitions.extend(other.definitions);
        self.executions.extend(other.executions);
    }
}

/// Settings shared by every run of a definition set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub base_url: String,
    /// Headers sent with every request unless the definition sets
    /// them itself.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: HashMap::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
}

/// A named test case. `depends_on` lists the definitions that must
/// run before it, forming a tree searched by exact name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub request: HttpRequest,
    #[serde(default)]
    pub expect: ResponseExpectation,
    /// Variable name → JSON path into the response body. Saved
    /// values are merged into the run context.
    #[serde(default)]
    pub save: IndexMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A runnable instance of a test definition bound to a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub name: String,
    pub test_definition: String,
    pub test_suite: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub functions: IndexMap<String, RestelFunction>,
    /// Executions listing this one in their `depends_on`. Filled in
    /// when definitions are loaded.
    #[serde(default, skip_deserializing)]
    pub parent_executions: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl ExecutionGroup {
    pub fn add_parent_execution(&mut self, parent: impl Into<String>) {
        let parent = parent.into();
        if !self.parent_executions.contains(&parent) {
            self.parent_executions.push(parent);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub actual: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(rename = "type")]
    pub assert_type: AssertType,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum AssertType {
    Equal,
    Greater,
    Lesser,
    Null,
    NotNull,
    NotEqual,
    True,
    False,
}

impl AssertType {
    pub const ALL: [AssertType; 8] = [
        Self::Equal,
        Self::Greater,
        Self::Lesser,
        Self::Null,
        Self::NotNull,
        Self::NotEqual,
        Self::True,
        Self::False,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::Greater => "GREATER",
            Self::Lesser => "LESSER",
            Self::Null => "NULL",
            Self::NotNull => "NOT_NULL",
            Self::NotEqual => "NOT_EQUAL",
            Self::True => "TRUE",
            Self::False => "FALSE",
        }
    }
}

impl fmt::Display for AssertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssertType {
    type Err = RestelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RestelError::InvalidAssertType(s.to_string()))
    }
}

impl TryFrom<String> for AssertType {
    type Error = RestelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A context-mutating operation applied before assertions run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestelFunction {
    pub operation: FunctionOperation,
    pub data: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum FunctionOperation {
    Add,
    Remove,
}

impl fmt::Display for FunctionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("ADD"),
            Self::Remove => f.write_str("REMOVE"),
        }
    }
}

impl FromStr for FunctionOperation {
    type Err = RestelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(Self::Add),
            "REMOVE" => Ok(Self::Remove),
            _ => Err(RestelError::InvalidOperation {
                operation: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for FunctionOperation {
    type Error = RestelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// Expected shape of a definition's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseExpectation {
    /// Accepted status codes.
    #[serde(default = "default_status_codes")]
    pub status: Vec<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON path → expected value, compared with `matcher`.
    #[serde(default)]
    pub json: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub contains: Vec<String>,
    /// Named matcher strategy for `json` values. EQUAL when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    /// Named matcher strategy for `headers`. EQUAL when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_matcher: Option<String>,
}

impl Default for ResponseExpectation {
    fn default() -> Self {
        Self {
            status: default_status_codes(),
            headers: HashMap::new(),
            json: IndexMap::new(),
            contains: Vec::new(),
            matcher: None,
            header_matcher: None,
        }
    }
}

fn default_status_codes() -> Vec<u16> {
    vec![200]
}

/// Result of running one test definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub request: RequestInfo,
    pub response: Option<ResponseInfo>,
    pub duration_ms: u64,
}

/// Captured HTTP request information for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Captured HTTP response information for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Report for a batch of runs, as written by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunReport {
    pub runs: Vec<crate::orchestrator::RunOutcome>,
    pub total_duration_ms: u64,
    pub timestamp: String,
}
