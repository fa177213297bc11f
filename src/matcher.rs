//! Comparison strategies keyed by [`AssertType`].

use crate::error::{RestelError, Result};
use crate::model::AssertType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one comparison; `Err` carries the mismatch
/// description.
pub type MatchResult = std::result::Result<(), String>;

/// Compares resolved operands. `None` means the operand resolved to
/// no value at all.
pub trait Matcher: Send + Sync {
    fn check(&self, actual: Option<&Value>, expected: Option<&Value>)
        -> MatchResult;
}

/// Explicit mapping from assertion type, or strategy name, to
/// matcher. Built once and shared by reference.
#[derive(Clone)]
pub struct MatcherRegistry {
    matchers: HashMap<AssertType, Arc<dyn Matcher>>,
    named: HashMap<String, Arc<dyn Matcher>>,
}

impl MatcherRegistry {
    pub fn empty() -> Self {
        Self {
            matchers: HashMap::new(),
            named: HashMap::new(),
        }
    }

    /// Registry with a matcher for every [`AssertType`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register(AssertType::Equal, Equal)
            .register(AssertType::NotEqual, NotEqual)
            .register(AssertType::Greater, NumericOrder::Greater)
            .register(AssertType::Lesser, NumericOrder::Lesser)
            .register(AssertType::Null, Presence::Absent)
            .register(AssertType::NotNull, Presence::Present)
            .register(AssertType::True, Truthiness(true))
            .register(AssertType::False, Truthiness(false))
            .register_named("contains", Contains);
        registry
    }

    /// Register or replace the matcher for `assert_type`.
    pub fn register<M>(&mut self, assert_type: AssertType, matcher: M) -> &mut Self
    where
        M: Matcher + 'static,
    {
        self.matchers.insert(assert_type, Arc::new(matcher));
        self
    }

    /// Register or replace a named strategy. Names are matched
    /// case-insensitively.
    pub fn register_named<M>(&mut self, name: &str, matcher: M) -> &mut Self
    where
        M: Matcher + 'static,
    {
        self.named
            .insert(name.trim().to_ascii_lowercase(), Arc::new(matcher));
        self
    }

    /// Look up a strategy by name. Names not registered explicitly
    /// fall back to the matcher of the assert type with that name.
    pub fn get_named(&self, name: &str) -> Result<&dyn Matcher> {
        if let Some(matcher) = self.named.get(&name.trim().to_ascii_lowercase()) {
            return Ok(&**matcher);
        }
        match name.parse::<AssertType>() {
            Ok(assert_type) => self.get(assert_type),
            Err(_) => Err(RestelError::UnknownMatcher(name.to_string())),
        }
    }

    pub fn get(&self, assert_type: AssertType) -> Result<&dyn Matcher> {
        self.matchers
            .get(&assert_type)
            .map(|m| &**m)
            .ok_or(RestelError::MissingMatcher(assert_type))
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> =
            self.matchers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        let mut named: Vec<&str> = self.named.keys().map(String::as_str).collect();
        named.sort_unstable();
        f.debug_struct("MatcherRegistry")
            .field("types", &types)
            .field("named", &named)
            .finish()
    }
}

/// Render a value the way it would be written in a definition file.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "<none>".to_string(), |v| v.to_string())
}

fn loosely_equal(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (None, None) => true,
        (Some(a), Some(e)) => {
            if a == e {
                return true;
            }
            if let (Some(x), Some(y)) = (as_number(a), as_number(e)) {
                return x == y;
            }
            render(a) == render(e)
        }
        (Some(v), None) | (None, Some(v)) => v.is_null(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

struct Equal;

impl Matcher for Equal {
    fn check(&self, actual: Option<&Value>, expected: Option<&Value>) -> MatchResult {
        if loosely_equal(actual, expected) {
            Ok(())
        } else {
            Err(format!(
                "expected {}, got {}",
                describe(expected),
                describe(actual)
            ))
        }
    }
}

struct NotEqual;

impl Matcher for NotEqual {
    fn check(&self, actual: Option<&Value>, expected: Option<&Value>) -> MatchResult {
        if loosely_equal(actual, expected) {
            Err(format!("expected a value other than {}", describe(expected)))
        } else {
            Ok(())
        }
    }
}

/// Rendered actual contains rendered expected.
struct Contains;

impl Matcher for Contains {
    fn check(&self, actual: Option<&Value>, expected: Option<&Value>) -> MatchResult {
        let (Some(a), Some(e)) = (actual, expected) else {
            return Err(format!(
                "expected {} to contain {}",
                describe(actual),
                describe(expected)
            ));
        };
        let (haystack, needle) = (render(a), render(e));
        if haystack.contains(&needle) {
            Ok(())
        } else {
            Err(format!("expected '{haystack}' to contain '{needle}'"))
        }
    }
}

enum NumericOrder {
    Greater,
    Lesser,
}

impl Matcher for NumericOrder {
    fn check(&self, actual: Option<&Value>, expected: Option<&Value>) -> MatchResult {
        let (Some(a), Some(e)) = (
            actual.and_then(as_number),
            expected.and_then(as_number),
        ) else {
            return Err(format!(
                "cannot compare {} with {} numerically",
                describe(actual),
                describe(expected)
            ));
        };
        let (holds, word) = match self {
            Self::Greater => (a > e, "greater"),
            Self::Lesser => (a < e, "less"),
        };
        if holds {
            Ok(())
        } else {
            Err(format!("expected {a} to be {word} than {e}"))
        }
    }
}

enum Presence {
    Absent,
    Present,
}

impl Matcher for Presence {
    fn check(&self, actual: Option<&Value>, _expected: Option<&Value>) -> MatchResult {
        let present = actual.is_some_and(|v| !v.is_null());
        match (self, present) {
            (Self::Absent, false) | (Self::Present, true) => Ok(()),
            (Self::Absent, true) => {
                Err(format!("expected no value, got {}", describe(actual)))
            }
            (Self::Present, false) => Err("expected a value, got none".into()),
        }
    }
}

struct Truthiness(bool);

impl Truthiness {
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                other => !other.is_empty(),
            },
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }
}

impl Matcher for Truthiness {
    fn check(&self, actual: Option<&Value>, _expected: Option<&Value>) -> MatchResult {
        let truthy = actual.is_some_and(Self::truthy);
        if truthy == self.0 {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.0, describe(actual)))
        }
    }
}
