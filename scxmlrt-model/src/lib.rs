//! # scxmlrt-model
//!
//! Immutable statechart tables consumed by the scxmlrt interpreter.
//!
//! This crate provides:
//! - State, transition and executable-content tables in document order
//! - Events and event-descriptor matching
//! - Validation of compiled documents
//! - A builder for assembling documents in code

pub mod builder;
pub mod document;
pub mod error;
pub mod event;
pub mod instruction;

pub use builder::{DocumentBuilder, TransitionBuilder};
pub use document::{
    AssignmentId, BindingMode, ContainerId, DataModelKind, Document, EvaluatorId, ForeachId,
    HistoryKind, StateId, StateKind, StateNode, Transition, TransitionId, TransitionKind, ROOT,
};
pub use error::ModelError;
pub use event::{matches_descriptor, Event, EventKind};
pub use instruction::{
    AssignmentInfo, DoneDataInfo, EvaluatorInfo, ForeachInfo, Instruction, InvokeInfo,
    InvokeSource, Param, SendInfo,
};
