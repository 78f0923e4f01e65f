//! JSON data model.
//!
//! Variables live in a `serde_json` object. Expressions, scripts and
//! assignment targets are parsed once per table id and cached.

use super::expr::{is_truthy, to_display, Environment, Expr, ExprParser, Location, Segment, Statement};
use super::{DataModel, ForeachBody, Scope, SystemVariables};
use crate::error::DataModelError;
use scxmlrt_model::{AssignmentId, EvaluatorId, Event, ForeachId};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

const NAME: &str = "json";

const SYSTEM_VARIABLES: [&str; 4] = ["_event", "_sessionid", "_name", "_ioprocessors"];

/// Values and evaluation state of one interpreter.
#[derive(Debug, Default)]
pub struct JsonDataModel {
    variables: Map<String, Value>,
    system: Map<String, Value>,
    /// Names supplied at start-up; `<data>` does not overwrite them.
    initial_names: HashSet<String>,
    expressions: HashMap<EvaluatorId, Expr>,
    scripts: HashMap<EvaluatorId, Vec<Statement>>,
    assignments: HashMap<AssignmentId, (Expr, Option<Expr>)>,
    foreachs: HashMap<ForeachId, (Expr, Expr, Option<Expr>)>,
}

/// Variables plus the live configuration, as seen by expressions.
struct Env<'a> {
    variables: &'a Map<String, Value>,
    system: &'a Map<String, Value>,
    scope: Option<&'a Scope<'a>>,
}

impl Environment for Env<'_> {
    fn variable(&self, name: &str) -> Option<&Value> {
        self.system
            .get(name)
            .or_else(|| self.variables.get(name))
    }

    fn in_state(&self, state: &str) -> bool {
        self.scope.map(|s| s.is_active(state)).unwrap_or(false)
    }
}

fn exec_error(context: &str, msg: impl std::fmt::Display) -> DataModelError {
    if context.is_empty() {
        DataModelError::Execution(msg.to_string())
    } else {
        DataModelError::Execution(format!("{} in {}", msg, context))
    }
}

impl JsonDataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a data model with variables already declared.
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    fn expression(&mut self, id: EvaluatorId, scope: &Scope<'_>) -> Result<&Expr, DataModelError> {
        if !self.expressions.contains_key(&id) {
            let info = scope.document.evaluator(id);
            let parsed =
                ExprParser::expression(&info.expr).map_err(|e| exec_error(&info.context, e))?;
            self.expressions.insert(id, parsed);
        }
        self.expressions
            .get(&id)
            .ok_or_else(|| DataModelError::execution("expression cache miss"))
    }

    fn evaluate(&mut self, id: EvaluatorId, scope: &Scope<'_>) -> Result<Value, DataModelError> {
        self.expression(id, scope)?;
        let context = &scope.document.evaluator(id).context;
        let env = Env {
            variables: &self.variables,
            system: &self.system,
            scope: Some(scope),
        };
        match self.expressions.get(&id) {
            Some(expr) => expr.evaluate(&env).map_err(|e| exec_error(context, e)),
            None => Err(DataModelError::execution("expression cache miss")),
        }
    }

    fn resolve_location(
        &self,
        expr: &Expr,
        scope: Option<&Scope<'_>>,
        context: &str,
    ) -> Result<Location, DataModelError> {
        let env = Env {
            variables: &self.variables,
            system: &self.system,
            scope,
        };
        let location = expr.location(&env).map_err(|e| exec_error(context, e))?;
        if SYSTEM_VARIABLES.contains(&location.root.as_str()) {
            return Err(exec_error(
                context,
                format!("cannot assign to read-only {}", location.root),
            ));
        }
        Ok(location)
    }

    /// Writes `value` at `location`. With `declare`, a missing top-level
    /// name is created; nested paths must always exist.
    fn store(
        &mut self,
        location: &Location,
        value: Value,
        declare: bool,
        context: &str,
    ) -> Result<(), DataModelError> {
        let Some((last, parents)) = location.path.split_last() else {
            if !declare && !self.variables.contains_key(&location.root) {
                return Err(exec_error(
                    context,
                    format!("{} does not exist", location.root),
                ));
            }
            self.variables.insert(location.root.clone(), value);
            return Ok(());
        };

        let mut current = self.variables.get_mut(&location.root).ok_or_else(|| {
            exec_error(context, format!("{} does not exist", location.root))
        })?;
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map
                    .get_mut(k)
                    .ok_or_else(|| exec_error(context, format!("{} does not exist", k)))?,
                (Segment::Index(i), Value::Array(items)) => items
                    .get_mut(*i)
                    .ok_or_else(|| exec_error(context, format!("index {} out of range", i)))?,
                (segment, _) => {
                    return Err(exec_error(
                        context,
                        format!("cannot descend into {:?}", segment),
                    ))
                }
            };
        }
        match (last, current) {
            (Segment::Key(k), Value::Object(map)) => {
                map.insert(k.clone(), value);
                Ok(())
            }
            (Segment::Index(i), Value::Array(items)) if *i < items.len() => {
                items[*i] = value;
                Ok(())
            }
            (Segment::Index(i), Value::Array(items)) if *i == items.len() => {
                items.push(value);
                Ok(())
            }
            (segment, _) => Err(exec_error(
                context,
                format!("cannot assign to {:?}", segment),
            )),
        }
    }

    fn prepare_assignment(
        &mut self,
        id: AssignmentId,
        scope: &Scope<'_>,
    ) -> Result<(), DataModelError> {
        if self.assignments.contains_key(&id) {
            return Ok(());
        }
        let info = scope.document.assignment(id);
        let dest = ExprParser::location(&info.dest).map_err(|e| exec_error(&info.context, e))?;
        let expr = match &info.expr {
            Some(src) => {
                Some(ExprParser::expression(src).map_err(|e| exec_error(&info.context, e))?)
            }
            None => None,
        };
        self.assignments.insert(id, (dest, expr));
        Ok(())
    }

    /// Evaluates an assignment's right side and resolves its target.
    fn assignment_parts(
        &mut self,
        id: AssignmentId,
        scope: &Scope<'_>,
    ) -> Result<(Location, Value), DataModelError> {
        self.prepare_assignment(id, scope)?;
        let context = scope.document.assignment(id).context.clone();
        let (dest, expr) = self
            .assignments
            .get(&id)
            .cloned()
            .ok_or_else(|| DataModelError::execution("assignment cache miss"))?;
        let env = Env {
            variables: &self.variables,
            system: &self.system,
            scope: Some(scope),
        };
        let value = match expr {
            Some(e) => e.evaluate(&env).map_err(|e| exec_error(&context, e))?,
            None => Value::Null,
        };
        let location = self.resolve_location(&dest, Some(scope), &context)?;
        Ok((location, value))
    }
}

impl DataModel for JsonDataModel {
    fn name(&self) -> &'static str {
        NAME
    }

    fn setup(
        &mut self,
        system: &SystemVariables,
        initial_values: &Map<String, Value>,
    ) -> Result<(), DataModelError> {
        self.system
            .insert("_sessionid".into(), Value::String(system.session_id.clone()));
        self.system
            .insert("_name".into(), Value::String(system.name.clone()));
        self.system.insert(
            "_ioprocessors".into(),
            serde_json::json!({
                "scxml": {"location": format!("#_scxml_{}", system.session_id)}
            }),
        );
        self.system.insert("_event".into(), Value::Null);
        for (name, value) in initial_values {
            if SYSTEM_VARIABLES.contains(&name.as_str()) {
                return Err(DataModelError::execution(format!(
                    "cannot initialize read-only {}",
                    name
                )));
            }
            self.variables.insert(name.clone(), value.clone());
            self.initial_names.insert(name.clone());
        }
        Ok(())
    }

    fn evaluate_to_bool(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<bool, DataModelError> {
        self.evaluate(id, scope).map(|v| is_truthy(&v))
    }

    fn evaluate_to_string(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<String, DataModelError> {
        self.evaluate(id, scope).map(|v| to_display(&v))
    }

    fn evaluate_to_value(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<Value, DataModelError> {
        self.evaluate(id, scope)
    }

    fn evaluate_to_void(
        &mut self,
        id: EvaluatorId,
        scope: &Scope<'_>,
    ) -> Result<(), DataModelError> {
        let info = scope.document.evaluator(id);
        let context = info.context.clone();
        if !self.scripts.contains_key(&id) {
            let parsed = ExprParser::script(&info.expr).map_err(|e| exec_error(&context, e))?;
            self.scripts.insert(id, parsed);
        }
        let statements = self.scripts.get(&id).cloned().unwrap_or_default();
        for statement in statements {
            match statement {
                Statement::Expr(expr) => {
                    let env = Env {
                        variables: &self.variables,
                        system: &self.system,
                        scope: Some(scope),
                    };
                    expr.evaluate(&env).map_err(|e| exec_error(&context, e))?;
                }
                Statement::Assign(target, expr) => {
                    let env = Env {
                        variables: &self.variables,
                        system: &self.system,
                        scope: Some(scope),
                    };
                    let value = expr.evaluate(&env).map_err(|e| exec_error(&context, e))?;
                    let location = self.resolve_location(&target, Some(scope), &context)?;
                    // Scripts may introduce new top-level variables.
                    self.store(&location, value, true, &context)?;
                }
            }
        }
        Ok(())
    }

    fn assign(&mut self, id: AssignmentId, scope: &Scope<'_>) -> Result<(), DataModelError> {
        let (location, value) = self.assignment_parts(id, scope)?;
        let context = scope.document.assignment(id).context.clone();
        self.store(&location, value, false, &context)
    }

    fn initialize(&mut self, id: AssignmentId, scope: &Scope<'_>) -> Result<(), DataModelError> {
        let info = scope.document.assignment(id);
        if self.initial_names.contains(info.dest.trim()) {
            return Ok(());
        }
        let context = info.context.clone();
        let dest = info.dest.trim().to_string();
        match self.assignment_parts(id, scope) {
            Ok((location, value)) => self.store(&location, value, true, &context),
            Err(e) => {
                // The variable exists afterwards even if its value failed.
                self.variables.entry(dest).or_insert(Value::Null);
                Err(e)
            }
        }
    }

    fn foreach(
        &mut self,
        id: ForeachId,
        scope: &Scope<'_>,
        body: &mut ForeachBody<'_>,
    ) -> Result<bool, DataModelError> {
        let info = scope.document.foreach_info(id);
        let context = info.context.clone();
        if !self.foreachs.contains_key(&id) {
            let array = ExprParser::expression(&info.array).map_err(|e| exec_error(&context, e))?;
            let item = ExprParser::location(&info.item).map_err(|e| exec_error(&context, e))?;
            let index = match &info.index {
                Some(i) => Some(ExprParser::location(i).map_err(|e| exec_error(&context, e))?),
                None => None,
            };
            self.foreachs.insert(id, (array, item, index));
        }
        let (array, item, index) = self
            .foreachs
            .get(&id)
            .cloned()
            .ok_or_else(|| DataModelError::execution("foreach cache miss"))?;

        let env = Env {
            variables: &self.variables,
            system: &self.system,
            scope: Some(scope),
        };
        // Iterate over a shallow copy so the body may modify the array.
        let items = match array.evaluate(&env).map_err(|e| exec_error(&context, e))? {
            Value::Array(items) => items,
            _ => return Err(exec_error(&context, "invalid array")),
        };
        let item_location = self.resolve_location(&item, Some(scope), &context)?;
        let index_location = match &index {
            Some(i) => Some(self.resolve_location(i, Some(scope), &context)?),
            None => None,
        };

        for (i, value) in items.into_iter().enumerate() {
            self.store(&item_location, value, true, &context)?;
            if let Some(loc) = &index_location {
                self.store(loc, Value::from(i), true, &context)?;
            }
            if !body(&mut *self) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn bind_event(&mut self, event: &Event) {
        self.system.insert("_event".into(), event.to_value());
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.system
            .get(name)
            .or_else(|| self.variables.get(name))
            .cloned()
    }

    fn has_property(&self, name: &str) -> bool {
        self.system.contains_key(name) || self.variables.contains_key(name)
    }

    fn set_property(
        &mut self,
        name: &str,
        value: Value,
        context: &str,
    ) -> Result<(), DataModelError> {
        let expr = ExprParser::location(name).map_err(|e| exec_error(context, e))?;
        let location = self.resolve_location(&expr, None, context)?;
        self.store(&location, value, true, context)
    }
}
