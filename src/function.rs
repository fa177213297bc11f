//! Context-mutating functions run before assertions.

use crate::context::TestContext;
use crate::error::{RestelError, Result};
use crate::model::{FunctionOperation, RestelFunction};
use crate::reference::{self, ReferenceResolver};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

pub struct FunctionExecutor<'a> {
    resolver: &'a ReferenceResolver<'a>,
}

impl<'a> FunctionExecutor<'a> {
    pub fn new(resolver: &'a ReferenceResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Run one function against `context` and return its result.
    ///
    /// `REMOVE` takes the entry named by `data` out of the context:
    /// a reference operand names its canonical key, anything else is
    /// used as the key verbatim (trimmed). A missing entry fails with
    /// [`RestelError::UnboundVariable`].
    pub fn execute(
        &self,
        function: &RestelFunction,
        context: &mut TestContext,
    ) -> Result<Value> {
        let references = if reference::is_variable(&function.data) {
            self.resolver.validate_operand(&function.data)?
        } else {
            Vec::new()
        };

        match function.operation {
            FunctionOperation::Remove => {
                let key = match references.as_slice() {
                    [single] => single.canonical_key(),
                    _ => function.data.trim().to_string(),
                };
                let removed = context.remove(&key)?;
                debug!("Removed '{}' from context of '{}'", key, context.run_name());
                Ok(removed)
            }
            FunctionOperation::Add => Err(RestelError::NotImplemented {
                operation: function.operation.to_string(),
                run: self.resolver.current().name.clone(),
            }),
        }
    }

    /// Run every function in declaration order, then merge the results
    /// keyed by function name. The merge is all-or-nothing.
    pub fn execute_all(
        &self,
        functions: &IndexMap<String, RestelFunction>,
        context: &mut TestContext,
    ) -> Result<()> {
        if functions.is_empty() {
            return Ok(());
        }

        let mut results = Vec::with_capacity(functions.len());
        for (name, function) in functions {
            debug!("Executing function '{}' ({})", name, function.operation);
            results.push((name.clone(), self.execute(function, context)?));
        }
        context.put_all(results)
    }
}
