//! Immutable document tables.
//!
//! A [`Document`] is the compiled form of a statechart. States are stored in
//! document order (pre-order, depth first), so a [`StateId`] doubles as the
//! state's document position: comparing two ids compares their positions.
//! State 0 is the chart root.
//!
//! Documents are produced by an external compiler, by [`Document::from_json`]
//! or by [`crate::DocumentBuilder`], and are validated once before an
//! interpreter accepts them.

use crate::error::ModelError;
use crate::instruction::{AssignmentInfo, EvaluatorInfo, ForeachInfo, Instruction, InvokeInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! table_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

table_id!(
    /// Index into [`Document::states`]; ordered by document position.
    StateId
);
table_id!(
    /// Index into [`Document::transitions`].
    TransitionId
);
table_id!(
    /// Index into [`Document::containers`].
    ContainerId
);
table_id!(
    /// Index into [`Document::evaluators`].
    EvaluatorId
);
table_id!(
    /// Index into [`Document::assignments`].
    AssignmentId
);
table_id!(
    /// Index into [`Document::foreachs`].
    ForeachId
);

/// The chart root.
pub const ROOT: StateId = StateId(0);

/// History depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Shallow,
    Deep,
}

/// Kind tag of a state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// A state with child states, exactly one of which is active.
    Compound,
    /// A state whose children are all active together.
    Parallel,
    /// An atomic state.
    Basic,
    /// An atomic state that completes its parent.
    Final,
    /// A pseudo-state restoring a recorded configuration.
    History(HistoryKind),
    /// A pseudo-state holding the default transition of its parent.
    Initial,
}

impl StateKind {
    pub fn is_pseudo(self) -> bool {
        matches!(self, StateKind::History(_) | StateKind::Initial)
    }
}

/// Whether a transition leaves its source when its targets are descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    External,
    Internal,
}

/// When `<data>` elements are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    /// Everything is initialized before the first configuration is entered.
    #[default]
    Early,
    /// A state's data is initialized on its first entry.
    Late,
}

/// The data model a document is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataModelKind {
    #[default]
    Null,
    Json,
}

/// A node of the state tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNode {
    /// Document-level identifier (`id` attribute).
    pub name: String,

    pub kind: StateKind,

    /// Parent state; `None` only for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StateId>,

    /// Children in document order, pseudo-states included.
    #[serde(default)]
    pub children: Vec<StateId>,

    /// Explicit initial transition of a compound state, or the default
    /// transition of a history state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<TransitionId>,

    /// Outgoing transitions in document order.
    #[serde(default)]
    pub transitions: Vec<TransitionId>,

    #[serde(default)]
    pub on_entry: Vec<ContainerId>,

    #[serde(default)]
    pub on_exit: Vec<ContainerId>,

    /// `<datamodel>` initialization block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ContainerId>,

    /// `<donedata>` of a final state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_data: Option<ContainerId>,

    #[serde(default)]
    pub invokes: Vec<InvokeInfo>,
}

impl StateNode {
    pub fn new(name: impl Into<String>, kind: StateKind, parent: Option<StateId>) -> Self {
        Self {
            name: name.into(),
            kind,
            parent,
            children: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            data: None,
            done_data: None,
            invokes: Vec::new(),
        }
    }
}

/// A transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub source: StateId,

    /// Event descriptors; empty for eventless transitions.
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EvaluatorId>,

    /// Targets; empty for targetless transitions.
    #[serde(default)]
    pub targets: Vec<StateId>,

    #[serde(default)]
    pub kind: TransitionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContainerId>,
}

impl Transition {
    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns true if any of the transition's descriptors matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|descriptor| crate::event::matches_descriptor(descriptor, name))
    }
}

/// A compiled statechart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// `name` attribute of the chart; also the root state's name.
    pub name: String,

    #[serde(default)]
    pub binding: BindingMode,

    #[serde(default)]
    pub data_model: DataModelKind,

    pub states: Vec<StateNode>,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    #[serde(default)]
    pub containers: Vec<Instruction>,

    #[serde(default)]
    pub evaluators: Vec<EvaluatorInfo>,

    #[serde(default)]
    pub assignments: Vec<AssignmentInfo>,

    #[serde(default)]
    pub foreachs: Vec<ForeachInfo>,

    #[serde(skip)]
    names: HashMap<String, StateId>,
}

impl Document {
    /// Assembles a document from raw tables and validates it.
    #[allow(clippy::too_many_arguments)]
    pub fn from_tables(
        name: impl Into<String>,
        binding: BindingMode,
        data_model: DataModelKind,
        states: Vec<StateNode>,
        transitions: Vec<Transition>,
        containers: Vec<Instruction>,
        evaluators: Vec<EvaluatorInfo>,
        assignments: Vec<AssignmentInfo>,
        foreachs: Vec<ForeachInfo>,
    ) -> Result<Self, ModelError> {
        let mut doc = Document {
            name: name.into(),
            binding,
            data_model,
            states,
            transitions,
            containers,
            evaluators,
            assignments,
            foreachs,
            names: HashMap::new(),
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Converts an in-memory JSON value into a validated document.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ModelError> {
        let mut doc: Document = serde_json::from_value(value.clone())?;
        doc.validate()?;
        Ok(doc)
    }

    /// Serializes the document tables.
    pub fn to_json(&self) -> Result<serde_json::Value, ModelError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Checks structural consistency and builds the name index.
    ///
    /// Nested documents referenced by `<invoke>` are validated as well.
    pub fn validate(&mut self) -> Result<(), ModelError> {
        if self.states.is_empty() {
            return Err(ModelError::invalid("document has no states"));
        }
        if self.states[0].parent.is_some() {
            return Err(ModelError::invalid("state 0 must be the root"));
        }
        if self.states[0].kind != StateKind::Compound {
            return Err(ModelError::invalid("root must be a compound state"));
        }

        let state_count = self.states.len();
        let check_state = |id: StateId, what: &str| {
            if id.index() >= state_count {
                Err(ModelError::invalid(format!(
                    "{} references unknown state {}",
                    what, id
                )))
            } else {
                Ok(())
            }
        };

        // Pre-order check: walking the tree from the root must visit ids
        // 0, 1, 2, ... in sequence.
        let mut expected = 0u32;
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            if id.0 != expected {
                return Err(ModelError::invalid(format!(
                    "states are not in document order: found {} at position {}",
                    id, expected
                )));
            }
            expected += 1;
            let node = &self.states[id.index()];
            for &child in node.children.iter().rev() {
                check_state(child, "children")?;
                if self.states[child.index()].parent != Some(id) {
                    return Err(ModelError::invalid(format!(
                        "state '{}' lists '{}' as child but is not its parent",
                        node.name,
                        self.states[child.index()].name
                    )));
                }
                stack.push(child);
            }
        }
        if expected as usize != state_count {
            return Err(ModelError::invalid("some states are unreachable from the root"));
        }

        let mut names = HashMap::with_capacity(state_count);
        for (idx, node) in self.states.iter().enumerate() {
            if node.name.is_empty() {
                return Err(ModelError::invalid(format!("state {} has no name", idx)));
            }
            if names.insert(node.name.clone(), StateId(idx as u32)).is_some() {
                return Err(ModelError::DuplicateState {
                    name: node.name.clone(),
                });
            }

            let proper_children = node
                .children
                .iter()
                .filter(|c| !self.states[c.index()].kind.is_pseudo())
                .count();
            match node.kind {
                StateKind::Compound | StateKind::Parallel if proper_children == 0 => {
                    return Err(ModelError::invalid(format!(
                        "state '{}' has no child states",
                        node.name
                    )));
                }
                StateKind::Basic | StateKind::Final if !node.children.is_empty() => {
                    return Err(ModelError::invalid(format!(
                        "atomic state '{}' has children",
                        node.name
                    )));
                }
                StateKind::History(_) => {
                    if node.initial.is_none() && node.transitions.len() > 1 {
                        return Err(ModelError::invalid(format!(
                            "history state '{}' has more than one default transition",
                            node.name
                        )));
                    }
                    if node.parent.is_none() {
                        return Err(ModelError::invalid("history state without parent"));
                    }
                }
                StateKind::Initial => {
                    if node.transitions.len() != 1 {
                        return Err(ModelError::invalid(format!(
                            "initial state '{}' must have exactly one transition",
                            node.name
                        )));
                    }
                }
                _ => {}
            }
            if node.done_data.is_some() && node.kind != StateKind::Final {
                return Err(ModelError::invalid(format!(
                    "done data on non-final state '{}'",
                    node.name
                )));
            }
            for &t in node.transitions.iter().chain(node.initial.iter()) {
                if t.index() >= self.transitions.len() {
                    return Err(ModelError::invalid(format!(
                        "state '{}' references unknown transition {}",
                        node.name, t
                    )));
                }
            }
            for c in node
                .on_entry
                .iter()
                .chain(node.on_exit.iter())
                .chain(node.data.iter())
                .chain(node.done_data.iter())
                .chain(node.invokes.iter().filter_map(|i| i.finalize.as_ref()))
            {
                self.check_container(*c)?;
            }
        }

        for (idx, t) in self.transitions.iter().enumerate() {
            check_state(t.source, "transition source")?;
            for &target in &t.targets {
                check_state(target, "transition target")?;
                if self.states[target.index()].kind == StateKind::Initial {
                    return Err(ModelError::invalid(format!(
                        "transition {} targets an initial pseudo-state",
                        idx
                    )));
                }
            }
            if let Some(cond) = t.condition {
                self.check_evaluator(cond)?;
            }
            if let Some(content) = t.content {
                self.check_container(content)?;
            }
        }

        for instruction in &self.containers {
            self.check_instruction(instruction)?;
        }

        for node in &mut self.states {
            for invoke in &mut node.invokes {
                if let crate::instruction::InvokeSource::Scxml { document } = &mut invoke.source {
                    std::sync::Arc::make_mut(document).validate()?;
                }
            }
        }

        self.names = names;
        Ok(())
    }

    fn check_container(&self, id: ContainerId) -> Result<(), ModelError> {
        if id.index() >= self.containers.len() {
            return Err(ModelError::invalid(format!("unknown container {}", id)));
        }
        Ok(())
    }

    fn check_evaluator(&self, id: EvaluatorId) -> Result<(), ModelError> {
        if id.index() >= self.evaluators.len() {
            return Err(ModelError::invalid(format!("unknown evaluator {}", id)));
        }
        Ok(())
    }

    fn check_instruction(&self, instruction: &Instruction) -> Result<(), ModelError> {
        match instruction {
            Instruction::Sequence { instructions } => {
                for i in instructions {
                    self.check_instruction(i)?;
                }
            }
            Instruction::If { conditions, blocks } => {
                if blocks.len() != conditions.len() && blocks.len() != conditions.len() + 1 {
                    return Err(ModelError::invalid(
                        "if needs one block per condition and an optional else block",
                    ));
                }
                for c in conditions {
                    self.check_evaluator(*c)?;
                }
                for b in blocks {
                    self.check_instruction(b)?;
                }
            }
            Instruction::Foreach { foreach, block } => {
                if foreach.index() >= self.foreachs.len() {
                    return Err(ModelError::invalid(format!("unknown foreach {}", foreach)));
                }
                self.check_instruction(block)?;
            }
            Instruction::Assign { assignment } | Instruction::Initialize { assignment } => {
                if assignment.index() >= self.assignments.len() {
                    return Err(ModelError::invalid(format!(
                        "unknown assignment {}",
                        assignment
                    )));
                }
            }
            Instruction::Script { script } => self.check_evaluator(*script)?,
            Instruction::Log { expr, .. } => {
                if let Some(e) = expr {
                    self.check_evaluator(*e)?;
                }
            }
            Instruction::Cancel { send_id_expr, .. } => {
                if let Some(e) = send_id_expr {
                    self.check_evaluator(*e)?;
                }
            }
            Instruction::Send(send) => {
                let exprs = [
                    send.event_expr,
                    send.target_expr,
                    send.type_expr,
                    send.delay_expr,
                    send.content_expr,
                ];
                for e in exprs.iter().flatten() {
                    self.check_evaluator(*e)?;
                }
                for p in send.params.iter().filter_map(|p| p.expr) {
                    self.check_evaluator(p)?;
                }
            }
            Instruction::DoneData(info) => {
                if let Some(e) = info.content_expr {
                    self.check_evaluator(e)?;
                }
                for p in info.params.iter().filter_map(|p| p.expr) {
                    self.check_evaluator(p)?;
                }
            }
            Instruction::Raise { .. } => {}
        }
        Ok(())
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    pub fn state(&self, id: StateId) -> &StateNode {
        &self.states[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.index()]
    }

    pub fn container(&self, id: ContainerId) -> &Instruction {
        &self.containers[id.index()]
    }

    pub fn evaluator(&self, id: EvaluatorId) -> &EvaluatorInfo {
        &self.evaluators[id.index()]
    }

    pub fn assignment(&self, id: AssignmentId) -> &AssignmentInfo {
        &self.assignments[id.index()]
    }

    pub fn foreach_info(&self, id: ForeachId) -> &ForeachInfo {
        &self.foreachs[id.index()]
    }

    pub fn name_of(&self, id: StateId) -> &str {
        &self.states[id.index()].name
    }

    pub fn kind(&self, id: StateId) -> StateKind {
        self.states[id.index()].kind
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.states[id.index()].parent
    }

    /// Looks up a state by name.
    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        if self.names.is_empty() {
            // Not validated yet; fall back to a scan.
            return self
                .states
                .iter()
                .position(|s| s.name == name)
                .map(|i| StateId(i as u32));
        }
        self.names.get(name).copied()
    }

    /// Returns true for compound states and for the root.
    pub fn is_compound(&self, id: StateId) -> bool {
        id == ROOT || self.kind(id) == StateKind::Compound
    }

    pub fn is_atomic(&self, id: StateId) -> bool {
        matches!(self.kind(id), StateKind::Basic | StateKind::Final)
    }

    /// Children excluding history and initial pseudo-states.
    pub fn child_states(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.state(id)
            .children
            .iter()
            .copied()
            .filter(move |c| !self.kind(*c).is_pseudo())
    }

    /// History pseudo-states declared directly inside `id`.
    pub fn history_children(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.state(id)
            .children
            .iter()
            .copied()
            .filter(move |c| matches!(self.kind(*c), StateKind::History(_)))
    }

    /// Returns true if `state` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, state: StateId, ancestor: StateId) -> bool {
        let mut current = self.parent(state);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Ancestors of `state`, innermost first, stopping before `upto`
    /// (or at the root when `upto` is `None`, root included).
    pub fn proper_ancestors(&self, state: StateId, upto: Option<StateId>) -> Vec<StateId> {
        let mut result = Vec::new();
        let mut current = self.parent(state);
        while let Some(p) = current {
            if Some(p) == upto {
                break;
            }
            result.push(p);
            current = self.parent(p);
        }
        result
    }

    /// Depth below the root.
    pub fn depth(&self, state: StateId) -> usize {
        self.proper_ancestors(state, None).len()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality through the serialized form.
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}
