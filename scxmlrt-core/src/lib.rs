//! # scxmlrt-core
//!
//! SCXML interpretation engine.
//!
//! This crate provides:
//! - The W3C event loop (microsteps, macrosteps, eventless transitions)
//! - Transition selection, conflict resolution and history
//! - Executable content against pluggable data models
//! - Delayed sends, invoked child sessions and external services
//! - An async session runner on tokio

pub mod config;
pub mod configuration;
pub mod datamodel;
pub mod error;
pub mod executor;
pub mod filter;
pub mod ids;
pub mod interpreter;
pub mod invoke;
pub mod observer;
pub mod queue;
pub mod selector;
pub mod session;
pub mod timer;

pub use config::{ConfigError, InterpreterConfig};
pub use configuration::Configuration;
pub use datamodel::{DataModel, JsonDataModel, NullDataModel, Scope, SystemVariables};
pub use error::{CoreError, DataModelError};
pub use executor::SCXML_EVENT_PROCESSOR;
pub use filter::EventFilter;
pub use ids::{IdGenerator, SequentialIds};
pub use interpreter::{Interpreter, InterpreterBuilder, Phase};
pub use invoke::{InvokableService, InvokeRequest, ScxmlService, ServiceFactory, ServiceRegistry};
pub use observer::{Notification, Observer, RecordingObserver};
pub use queue::EventSender;
pub use session::{Session, SessionHandle, Signal};
pub use timer::{parse_delay, Route};
