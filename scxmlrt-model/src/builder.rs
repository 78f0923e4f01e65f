//! Programmatic document construction.
//!
//! States may be added in any order; [`DocumentBuilder::build`] renumbers
//! them into document order before validating.
//!
//! ```
//! use scxmlrt_model::DocumentBuilder;
//!
//! let mut b = DocumentBuilder::new("machine");
//! let s1 = b.state("s1");
//! let s2 = b.state("s2");
//! b.transition(s1).on("go").target(s2).add();
//! let doc = b.build().unwrap();
//! assert_eq!(doc.state_by_name("s2").map(|s| s.0), Some(2));
//! ```

use crate::document::{
    AssignmentId, BindingMode, ContainerId, DataModelKind, Document, EvaluatorId, ForeachId,
    HistoryKind, StateId, StateKind, StateNode, Transition, TransitionId, TransitionKind, ROOT,
};
use crate::error::ModelError;
use crate::instruction::{
    AssignmentInfo, DoneDataInfo, EvaluatorInfo, ForeachInfo, Instruction, InvokeInfo, SendInfo,
};
use std::collections::HashSet;

/// Assembles a [`Document`] in code.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    name: String,
    binding: BindingMode,
    data_model: DataModelKind,
    states: Vec<StateNode>,
    transitions: Vec<Transition>,
    containers: Vec<Instruction>,
    evaluators: Vec<EvaluatorInfo>,
    assignments: Vec<AssignmentInfo>,
    foreachs: Vec<ForeachInfo>,
}

impl DocumentBuilder {
    /// Creates a builder whose root state is named after the chart.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            states: vec![StateNode::new(name.clone(), StateKind::Compound, None)],
            name,
            binding: BindingMode::Early,
            data_model: DataModelKind::Null,
            transitions: Vec::new(),
            containers: Vec::new(),
            evaluators: Vec::new(),
            assignments: Vec::new(),
            foreachs: Vec::new(),
        }
    }

    pub fn binding(&mut self, binding: BindingMode) -> &mut Self {
        self.binding = binding;
        self
    }

    pub fn data_model(&mut self, kind: DataModelKind) -> &mut Self {
        self.data_model = kind;
        self
    }

    pub fn root(&self) -> StateId {
        ROOT
    }

    // =========================================================================
    // States
    // =========================================================================

    fn add_state(&mut self, parent: StateId, name: &str, kind: StateKind) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(StateNode::new(name, kind, Some(parent)));
        self.states[parent.index()].children.push(id);
        id
    }

    /// Adds a state under the root. It becomes compound once it has children.
    pub fn state(&mut self, name: &str) -> StateId {
        self.add_state(ROOT, name, StateKind::Basic)
    }

    pub fn state_in(&mut self, parent: StateId, name: &str) -> StateId {
        self.add_state(parent, name, StateKind::Basic)
    }

    pub fn parallel(&mut self, name: &str) -> StateId {
        self.add_state(ROOT, name, StateKind::Parallel)
    }

    pub fn parallel_in(&mut self, parent: StateId, name: &str) -> StateId {
        self.add_state(parent, name, StateKind::Parallel)
    }

    pub fn final_state(&mut self, name: &str) -> StateId {
        self.add_state(ROOT, name, StateKind::Final)
    }

    pub fn final_in(&mut self, parent: StateId, name: &str) -> StateId {
        self.add_state(parent, name, StateKind::Final)
    }

    /// Adds a history pseudo-state. Give it a default with [`Self::initial`].
    pub fn history_in(&mut self, parent: StateId, name: &str, kind: HistoryKind) -> StateId {
        self.add_state(parent, name, StateKind::History(kind))
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Starts a transition leaving `source`.
    pub fn transition(&mut self, source: StateId) -> TransitionBuilder<'_> {
        TransitionBuilder {
            builder: self,
            transition: Transition {
                source,
                events: Vec::new(),
                condition: None,
                targets: Vec::new(),
                kind: TransitionKind::External,
                content: None,
            },
            default_of: None,
        }
    }

    /// Starts the default transition of a compound state (its `initial`)
    /// or of a history pseudo-state.
    pub fn initial(&mut self, state: StateId) -> TransitionBuilder<'_> {
        let mut tb = self.transition(state);
        tb.default_of = Some(state);
        tb
    }

    // =========================================================================
    // Executable content
    // =========================================================================

    /// Registers an expression.
    pub fn expr(&mut self, expr: &str) -> EvaluatorId {
        self.expr_in(expr, "")
    }

    /// Registers an expression with a context used in error messages.
    pub fn expr_in(&mut self, expr: &str, context: &str) -> EvaluatorId {
        let id = EvaluatorId(self.evaluators.len() as u32);
        self.evaluators.push(EvaluatorInfo {
            expr: expr.to_string(),
            context: context.to_string(),
        });
        id
    }

    fn assignment(&mut self, dest: &str, expr: Option<&str>, context: &str) -> AssignmentId {
        let id = AssignmentId(self.assignments.len() as u32);
        self.assignments.push(AssignmentInfo {
            dest: dest.to_string(),
            expr: expr.map(str::to_string),
            context: context.to_string(),
        });
        id
    }

    /// Stores an instruction block and returns its id.
    pub fn container(&mut self, instructions: Vec<Instruction>) -> ContainerId {
        let id = ContainerId(self.containers.len() as u32);
        self.containers.push(Instruction::sequence(instructions));
        id
    }

    pub fn on_entry(&mut self, state: StateId, instructions: Vec<Instruction>) -> &mut Self {
        let c = self.container(instructions);
        self.states[state.index()].on_entry.push(c);
        self
    }

    pub fn on_exit(&mut self, state: StateId, instructions: Vec<Instruction>) -> &mut Self {
        let c = self.container(instructions);
        self.states[state.index()].on_exit.push(c);
        self
    }

    /// Declares `<data>` items of `state`, each with an optional expression.
    pub fn data(&mut self, state: StateId, items: &[(&str, Option<&str>)]) -> &mut Self {
        let mut instructions = Vec::with_capacity(items.len());
        for (name, expr) in items {
            let context = format!("data '{}'", name);
            let assignment = self.assignment(name, *expr, &context);
            instructions.push(Instruction::Initialize { assignment });
        }
        let c = self.container(instructions);
        self.states[state.index()].data = Some(c);
        self
    }

    pub fn done_data(&mut self, state: StateId, info: DoneDataInfo) -> &mut Self {
        let c = self.container(vec![Instruction::DoneData(info)]);
        self.states[state.index()].done_data = Some(c);
        self
    }

    pub fn invoke(&mut self, state: StateId, mut info: InvokeInfo) -> &mut Self {
        if info.id.is_none() && info.id_prefix.is_empty() {
            info.id_prefix = format!("{}.", self.states[state.index()].name);
        }
        self.states[state.index()].invokes.push(info);
        self
    }

    pub fn raise(&self, event: &str) -> Instruction {
        Instruction::Raise {
            event: event.to_string(),
        }
    }

    pub fn log(&mut self, label: &str, expr: &str) -> Instruction {
        let expr = self.expr_in(expr, "log");
        Instruction::Log {
            label: label.to_string(),
            expr: Some(expr),
        }
    }

    pub fn assign(&mut self, dest: &str, expr: &str) -> Instruction {
        let context = format!("assign to '{}'", dest);
        let assignment = self.assignment(dest, Some(expr), &context);
        Instruction::Assign { assignment }
    }

    pub fn script(&mut self, source: &str) -> Instruction {
        let script = self.expr_in(source, "script");
        Instruction::Script { script }
    }

    pub fn send(&self, info: SendInfo) -> Instruction {
        Instruction::Send(Box::new(info))
    }

    pub fn cancel(&self, send_id: &str) -> Instruction {
        Instruction::Cancel {
            send_id: Some(send_id.to_string()),
            send_id_expr: None,
        }
    }

    pub fn cancel_expr(&mut self, expr: &str) -> Instruction {
        let e = self.expr_in(expr, "cancel");
        Instruction::Cancel {
            send_id: None,
            send_id_expr: Some(e),
        }
    }

    /// `<if>` with `(condition, block)` branches and an optional else block.
    pub fn if_else(
        &mut self,
        branches: Vec<(&str, Vec<Instruction>)>,
        otherwise: Option<Vec<Instruction>>,
    ) -> Instruction {
        let mut conditions = Vec::with_capacity(branches.len());
        let mut blocks = Vec::with_capacity(branches.len() + 1);
        for (cond, block) in branches {
            conditions.push(self.expr_in(cond, "if"));
            blocks.push(Instruction::sequence(block));
        }
        if let Some(block) = otherwise {
            blocks.push(Instruction::sequence(block));
        }
        Instruction::If { conditions, blocks }
    }

    pub fn foreach(
        &mut self,
        array: &str,
        item: &str,
        index: Option<&str>,
        body: Vec<Instruction>,
    ) -> Instruction {
        let id = ForeachId(self.foreachs.len() as u32);
        self.foreachs.push(ForeachInfo {
            array: array.to_string(),
            item: item.to_string(),
            index: index.map(str::to_string),
            context: "foreach".to_string(),
        });
        Instruction::Foreach {
            foreach: id,
            block: Box::new(Instruction::sequence(body)),
        }
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Renumbers states into document order and validates the result.
    pub fn build(self) -> Result<Document, ModelError> {
        let DocumentBuilder {
            name,
            binding,
            data_model,
            states,
            mut transitions,
            containers,
            evaluators,
            assignments,
            foreachs,
        } = self;

        let mut seen = HashSet::new();
        for s in &states {
            if !seen.insert(s.name.as_str()) {
                return Err(ModelError::DuplicateState {
                    name: s.name.clone(),
                });
            }
        }

        // Pre-order walk gives the new numbering.
        let mut order = Vec::with_capacity(states.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(states[id.index()].children.iter().rev().copied());
        }
        let mut remap = vec![StateId(0); states.len()];
        for (new, old) in order.iter().enumerate() {
            remap[old.index()] = StateId(new as u32);
        }
        let map = |id: StateId| remap[id.index()];

        let mut renumbered = Vec::with_capacity(states.len());
        for old in &order {
            let mut node = states[old.index()].clone();
            node.parent = node.parent.map(map);
            node.children = node.children.iter().map(|c| map(*c)).collect();
            if node.kind == StateKind::Basic && !node.children.is_empty() {
                node.kind = StateKind::Compound;
            }
            renumbered.push(node);
        }
        for t in &mut transitions {
            t.source = map(t.source);
            t.targets = t.targets.iter().map(|s| map(*s)).collect();
        }

        Document::from_tables(
            name,
            binding,
            data_model,
            renumbered,
            transitions,
            containers,
            evaluators,
            assignments,
            foreachs,
        )
    }
}

/// Fluent construction of one transition.
pub struct TransitionBuilder<'a> {
    builder: &'a mut DocumentBuilder,
    transition: Transition,
    default_of: Option<StateId>,
}

impl<'a> TransitionBuilder<'a> {
    /// Adds event descriptors; whitespace separates several.
    pub fn on(mut self, events: &str) -> Self {
        self.transition
            .events
            .extend(events.split_whitespace().map(str::to_string));
        self
    }

    pub fn target(mut self, target: StateId) -> Self {
        self.transition.targets.push(target);
        self
    }

    pub fn targets(mut self, targets: &[StateId]) -> Self {
        self.transition.targets.extend_from_slice(targets);
        self
    }

    pub fn cond(mut self, expr: &str) -> Self {
        let context = format!(
            "condition on transition from '{}'",
            self.builder.states[self.transition.source.index()].name
        );
        self.transition.condition = Some(self.builder.expr_in(expr, &context));
        self
    }

    pub fn internal(mut self) -> Self {
        self.transition.kind = TransitionKind::Internal;
        self
    }

    pub fn content(mut self, instructions: Vec<Instruction>) -> Self {
        self.transition.content = Some(self.builder.container(instructions));
        self
    }

    /// Stores the transition and attaches it to its source.
    pub fn add(self) -> TransitionId {
        let id = TransitionId(self.builder.transitions.len() as u32);
        let source = self.transition.source;
        self.builder.transitions.push(self.transition);
        match self.default_of {
            Some(state) => self.builder.states[state.index()].initial = Some(id),
            None => self.builder.states[source.index()].transitions.push(id),
        }
        id
    }
}
