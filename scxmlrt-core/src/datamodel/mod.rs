//! Data model contract.
//!
//! The interpreter never evaluates expressions itself. It hands table ids to
//! a [`DataModel`] together with a [`Scope`] that exposes the document and the
//! live configuration (for `In(...)`).
//!
//! Errors come in two flavours. [`DataModelError::Execution`] is a runtime
//! value problem; the interpreter raises `error.execution` and carries on.
//! [`DataModelError::Unsupported`] means the document asks for something the
//! data model cannot do at all; the interpreter stops.

mod expr;
mod json;
mod null;

pub use expr::{Expr, ExprParser};
pub use json::JsonDataModel;
pub use null::NullDataModel;

use crate::configuration::Configuration;
use crate::error::DataModelError;
use scxmlrt_model::{AssignmentId, DataModelKind, Document, EvaluatorId, Event, ForeachId};
use serde_json::{Map, Value};

/// Read-only view the data model evaluates against.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub document: &'a Document,
    pub configuration: &'a Configuration,
}

impl<'a> Scope<'a> {
    pub fn new(document: &'a Document, configuration: &'a Configuration) -> Self {
        Self {
            document,
            configuration,
        }
    }

    /// The `In(state)` predicate.
    pub fn is_active(&self, name: &str) -> bool {
        self.document
            .state_by_name(name)
            .map(|id| self.configuration.contains(id))
            .unwrap_or(false)
    }
}

/// Session-level values visible to expressions.
#[derive(Debug, Clone)]
pub struct SystemVariables {
    pub session_id: String,
    pub name: String,
}

/// Body of a `<foreach>`; returns false when an iteration failed.
pub type ForeachBody<'b> = dyn FnMut(&mut dyn DataModel) -> bool + 'b;

/// The evaluation contract between interpreter and scripting layer.
pub trait DataModel: Send {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Installs system variables and the initial values supplied by the
    /// embedder.
    fn setup(
        &mut self,
        system: &SystemVariables,
        initial_values: &Map<String, Value>,
    ) -> Result<(), DataModelError>;

    fn evaluate_to_bool(&mut self, id: EvaluatorId, scope: &Scope<'_>)
        -> Result<bool, DataModelError>;

    fn evaluate_to_string(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<String, DataModelError>;

    fn evaluate_to_value(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<Value, DataModelError>;

    /// Runs a script for its side effects.
    fn evaluate_to_void(&mut self, id: EvaluatorId, scope: &Scope<'_>)
        -> Result<(), DataModelError>;

    fn assign(&mut self, id: AssignmentId, scope: &Scope<'_>) -> Result<(), DataModelError>;

    /// Declares a variable. Names supplied as initial values keep them.
    fn initialize(&mut self, id: AssignmentId, scope: &Scope<'_>) -> Result<(), DataModelError>;

    /// Iterates an array, binding item and index before each call of `body`.
    /// Returns `Ok(false)` if the body reported a failure.
    fn foreach(
        &mut self,
        id: ForeachId,
        scope: &Scope<'_>,
        body: &mut ForeachBody<'_>,
    ) -> Result<bool, DataModelError>;

    /// Makes `event` the value of `_event`.
    fn bind_event(&mut self, event: &Event);

    fn property(&self, name: &str) -> Option<Value>;

    fn has_property(&self, name: &str) -> bool;

    /// Writes a location, e.g. an `idlocation` or a foreach item.
    fn set_property(&mut self, name: &str, value: Value, context: &str)
        -> Result<(), DataModelError>;
}

/// Creates the data model a document asks for.
pub fn for_document(document: &Document) -> Box<dyn DataModel> {
    match document.data_model {
        DataModelKind::Null => Box::new(NullDataModel::new()),
        DataModelKind::Json => Box::new(JsonDataModel::new()),
    }
}
