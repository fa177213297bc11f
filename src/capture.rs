//! Request/response payloads captured during runs, and the lookup
//! of reference values inside them.

use crate::model::{RequestInfo, ResponseInfo};
use crate::reference::{PayloadScope, VariableReference};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Reads the value a validated reference points at.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, reference: &VariableReference) -> Option<Value>;
}

/// One request/response pair as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Exchange {
    pub request: Value,
    pub response: Value,
}

impl Exchange {
    /// Build an exchange from captured HTTP info. Bodies that parse
    /// as JSON are stored parsed.
    pub fn from_http(request: &RequestInfo, response: &ResponseInfo) -> Self {
        let mut req = Map::new();
        req.insert("method".into(), Value::String(request.method.clone()));
        req.insert("url".into(), Value::String(request.url.clone()));
        req.insert("headers".into(), string_map(&request.headers));
        req.insert("body".into(), body_value(request.body.as_deref()));

        let mut res = Map::new();
        res.insert(
            "status".into(),
            Value::Number(Number::from(response.status)),
        );
        res.insert("headers".into(), string_map(&response.headers));
        res.insert("body".into(), body_value(response.body.as_deref()));

        Self {
            request: Value::Object(req),
            response: Value::Object(res),
        }
    }

    pub fn payload(&self, scope: PayloadScope) -> &Value {
        match scope {
            PayloadScope::Request => &self.request,
            PayloadScope::Response => &self.response,
        }
    }
}

/// Exchanges keyed by execution, then definition name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapturedPayloads {
    exchanges: IndexMap<String, IndexMap<String, Exchange>>,
}

impl CapturedPayloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        execution: impl Into<String>,
        definition: impl Into<String>,
        exchange: Exchange,
    ) {
        self.exchanges
            .entry(execution.into())
            .or_default()
            .insert(definition.into(), exchange);
    }

    pub fn get(&self, execution: &str, definition: &str) -> Option<&Exchange> {
        self.exchanges.get(execution)?.get(definition)
    }

    /// Fold `other` into `self`; later captures replace earlier ones
    /// for the same execution and definition.
    pub fn merge(&mut self, other: CapturedPayloads) {
        for (execution, definitions) in other.exchanges {
            self.exchanges
                .entry(execution)
                .or_default()
                .extend(definitions);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl FieldExtractor for CapturedPayloads {
    fn extract(&self, reference: &VariableReference) -> Option<Value> {
        let exchange = self.get(&reference.execution, &reference.definition)?;
        get_value_by_path(exchange.payload(reference.scope), &reference.path)
            .cloned()
    }
}

/// Walk `path` (dot separated, numeric segments index arrays) into
/// `value`. An empty path yields `value` itself.
pub fn get_value_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }

        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(array) => {
                let index = part.parse::<usize>().ok()?;
                current = array.get(index)?;
            }
            _ => {
                return None;
            }
        }
    }

    Some(current)
}

fn string_map(map: &HashMap<String, String>) -> Value {
    let mut obj = Map::new();
    for (k, v) in map {
        obj.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(obj)
}

fn body_value(body: Option<&str>) -> Value {
    match body {
        Some(raw) => serde_json::from_str(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exchange() -> Exchange {
        let request = RequestInfo {
            method: "POST".into(),
            url: "http://localhost/login".into(),
            headers: HashMap::from([("x-trace".into(), "abc".into())]),
            body: Some(r#"{"user":"bob"}"#.into()),
        };
        let response = ResponseInfo {
            status: 200,
            headers: HashMap::new(),
            body: Some(r#"{"token":"t-1","roles":["admin","ops"]}"#.into()),
        };
        Exchange::from_http(&request, &response)
    }

    fn reference(scope: PayloadScope, path: &str) -> VariableReference {
        VariableReference {
            execution: "login_exec".into(),
            definition: "login".into(),
            scope,
            path: path.into(),
        }
    }

    #[test]
    fn test_extract_response_fields() {
        let mut captures = CapturedPayloads::new();
        captures.record("login_exec", "login", exchange());

        assert_eq!(
            captures.extract(&reference(PayloadScope::Response, "status")),
            Some(json!(200))
        );
        assert_eq!(
            captures.extract(&reference(PayloadScope::Response, "body.roles.1")),
            Some(json!("ops"))
        );
        assert_eq!(
            captures.extract(&reference(PayloadScope::Request, "body.user")),
            Some(json!("bob"))
        );
        assert_eq!(
            captures.extract(&reference(PayloadScope::Request, "headers.x-trace")),
            Some(json!("abc"))
        );
    }

    #[test]
    fn test_extract_missing() {
        let mut captures = CapturedPayloads::new();
        assert_eq!(
            captures.extract(&reference(PayloadScope::Response, "status")),
            None
        );
        captures.record("login_exec", "login", exchange());
        assert_eq!(
            captures.extract(&reference(PayloadScope::Response, "body.nope")),
            None
        );
    }

    #[test]
    fn test_non_json_body_kept_as_string() {
        let response = ResponseInfo {
            status: 500,
            headers: HashMap::new(),
            body: Some("oops".into()),
        };
        let request = RequestInfo {
            method: "GET".into(),
            url: "/".into(),
            headers: HashMap::new(),
            body: None,
        };
        let exchange = Exchange::from_http(&request, &response);
        assert_eq!(exchange.response["body"], json!("oops"));
        assert_eq!(exchange.request["body"], Value::Null);
    }

    #[test]
    fn test_merge_replaces_same_definition() {
        let mut first = CapturedPayloads::new();
        first.record("a", "d", Exchange::default());
        let mut second = CapturedPayloads::new();
        second.record("a", "d", exchange());
        second.record("b", "d", Exchange::default());

        first.merge(second);
        assert_eq!(first.get("a", "d"), Some(&exchange()));
        assert!(first.get("b", "d").is_some());
    }
}
