//! The null data model.
//!
//! Conditions may only take the form `In(state)`. Expressions evaluated to
//! strings are returned verbatim so `<log>` still works. Everything else is
//! unsupported and stops the interpreter.

use super::{DataModel, ForeachBody, Scope, SystemVariables};
use crate::error::DataModelError;
use scxmlrt_model::{AssignmentId, EvaluatorId, Event, ForeachId};
use serde_json::{Map, Value};
use std::collections::HashMap;

const NAME: &str = "null";

fn unsupported(operation: &'static str) -> DataModelError {
    DataModelError::Unsupported {
        operation,
        model: NAME,
    }
}

/// Data model without variables.
#[derive(Debug, Default)]
pub struct NullDataModel {
    /// Resolved `In(...)` arguments, or the error message for malformed guards.
    resolved: HashMap<EvaluatorId, Result<String, String>>,
}

impl NullDataModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(id: EvaluatorId, scope: &Scope<'_>) -> Result<String, String> {
        let info = scope.document.evaluator(id);
        let expr: String = info.expr.chars().filter(|c| !c.is_whitespace()).collect();
        match expr
            .strip_prefix("In(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(state) => Ok(state.to_string()),
            None => Err(format!("{} in {}", expr, info.context)),
        }
    }
}

impl DataModel for NullDataModel {
    fn name(&self) -> &'static str {
        NAME
    }

    fn setup(
        &mut self,
        _system: &SystemVariables,
        _initial_values: &Map<String, Value>,
    ) -> Result<(), DataModelError> {
        Ok(())
    }

    fn evaluate_to_bool(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<bool, DataModelError> {
        let resolved = self
            .resolved
            .entry(id)
            .or_insert_with(|| Self::resolve(id, scope));
        match resolved {
            Ok(state) => Ok(scope.is_active(state)),
            Err(msg) => Err(DataModelError::Execution(msg.clone())),
        }
    }

    fn evaluate_to_string(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<String, DataModelError> {
        Ok(scope.document.evaluator(id).expr.clone())
    }

    fn evaluate_to_value(
        &mut self,
        _id: EvaluatorId,
        _scope: &Scope<'_>,
    ) -> Result<Value, DataModelError> {
        Err(unsupported("value evaluation"))
    }

    fn evaluate_to_void(
        &mut self,
        _id: EvaluatorId,
        _scope: &Scope<'_>,
    ) -> Result<(), DataModelError> {
        Err(unsupported("scripts"))
    }

    fn assign(&mut self, _id: AssignmentId, _scope: &Scope<'_>) -> Result<(), DataModelError> {
        Err(unsupported("assignment"))
    }

    fn initialize(&mut self, _id: AssignmentId, _scope: &Scope<'_>) -> Result<(), DataModelError> {
        Err(unsupported("data initialization"))
    }

    fn foreach(
        &mut self,
        _id: ForeachId,
        _scope: &Scope<'_>,
        _body: &mut ForeachBody<'_>,
    ) -> Result<bool, DataModelError> {
        Err(unsupported("foreach"))
    }

    fn bind_event(&mut self, _event: &Event) {}

    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_property(&self, _name: &str) -> bool {
        false
    }

    fn set_property(
        &mut self,
        _name: &str,
        _value: Value,
        _context: &str,
    ) -> Result<(), DataModelError> {
        Err(unsupported("locations"))
    }
}
