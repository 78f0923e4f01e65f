//! Executable content.
//!
//! Instructions form trees that are stored in the document's container table
//! and referenced by [`ContainerId`]. Expressions, assignments and foreach
//! loops live in side tables so the data model can cache whatever it derives
//! from them (parsed syntax trees, compiled functions) per id.

use crate::document::{AssignmentId, ContainerId, Document, EvaluatorId, ForeachId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single executable-content instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Runs children in order, stopping at the first failure.
    Sequence { instructions: Vec<Instruction> },

    /// `<if>/<elseif>/<else>`. `blocks` has one entry per condition plus an
    /// optional trailing else block.
    If {
        conditions: Vec<EvaluatorId>,
        blocks: Vec<Instruction>,
    },

    /// `<foreach>`.
    Foreach {
        foreach: ForeachId,
        block: Box<Instruction>,
    },

    /// `<raise>`: appends an internal event.
    Raise { event: String },

    /// `<send>`.
    Send(Box<SendInfo>),

    /// `<cancel>`: drops a pending delayed send.
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_id_expr: Option<EvaluatorId>,
    },

    /// `<assign>`.
    Assign { assignment: AssignmentId },

    /// `<data>` initialization.
    Initialize { assignment: AssignmentId },

    /// `<script>`.
    Script { script: EvaluatorId },

    /// `<log>`.
    Log {
        #[serde(default)]
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<EvaluatorId>,
    },

    /// `<donedata>` of a final state.
    DoneData(DoneDataInfo),
}

impl Instruction {
    /// Convenience constructor for a sequence.
    pub fn sequence(instructions: Vec<Instruction>) -> Self {
        Instruction::Sequence { instructions }
    }

    /// Returns the instruction's kind as used in log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Sequence { .. } => "sequence",
            Instruction::If { .. } => "if",
            Instruction::Foreach { .. } => "foreach",
            Instruction::Raise { .. } => "raise",
            Instruction::Send(_) => "send",
            Instruction::Cancel { .. } => "cancel",
            Instruction::Assign { .. } => "assign",
            Instruction::Initialize { .. } => "initialize",
            Instruction::Script { .. } => "script",
            Instruction::Log { .. } => "log",
            Instruction::DoneData(_) => "donedata",
        }
    }
}

/// A `<param>` element: a name bound to either an expression or a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<EvaluatorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Everything a `<send>` needs. Literal attributes and their `*_expr`
/// counterparts are mutually exclusive; the literal wins if both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SendInfo {
    pub event: Option<String>,
    pub event_expr: Option<EvaluatorId>,
    pub target: Option<String>,
    pub target_expr: Option<EvaluatorId>,
    #[serde(rename = "type")]
    pub send_type: Option<String>,
    pub type_expr: Option<EvaluatorId>,
    pub id: Option<String>,
    /// Location that receives a generated send id.
    pub id_location: Option<String>,
    pub delay: Option<String>,
    pub delay_expr: Option<EvaluatorId>,
    pub namelist: Vec<String>,
    pub params: Vec<Param>,
    /// Literal `<content>` value.
    pub content: Option<serde_json::Value>,
    pub content_expr: Option<EvaluatorId>,
    /// Human-readable position used in error messages.
    pub location: String,
}

/// Payload description of a final state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoneDataInfo {
    pub content: Option<serde_json::Value>,
    pub content_expr: Option<EvaluatorId>,
    pub params: Vec<Param>,
    pub location: String,
}

/// Where an invoked service comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvokeSource {
    /// A nested statechart, run as a child interpreter.
    Scxml { document: Arc<Document> },
    /// A service created by a registered factory.
    Service {
        service_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<String>,
    },
}

/// An `<invoke>` element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeInfo {
    /// Explicit invoke id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Prefix for a generated id (usually `<state>.`).
    #[serde(default)]
    pub id_prefix: String,
    /// Location that receives a generated id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_location: Option<String>,
    pub source: InvokeSource,
    #[serde(default)]
    pub namelist: Vec<String>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub autoforward: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<ContainerId>,
    #[serde(default)]
    pub location: String,
}

impl InvokeInfo {
    pub fn new(source: InvokeSource) -> Self {
        Self {
            id: None,
            id_prefix: String::new(),
            id_location: None,
            source,
            namelist: Vec::new(),
            params: Vec::new(),
            autoforward: false,
            finalize: None,
            location: String::new(),
        }
    }
}

/// An expression with the context it appears in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorInfo {
    pub expr: String,
    #[serde(default)]
    pub context: String,
}

/// `dest = expr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentInfo {
    pub dest: String,
    /// No expression assigns `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default)]
    pub context: String,
}

/// `<foreach array item index>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeachInfo {
    pub array: String,
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default)]
    pub context: String,
}
