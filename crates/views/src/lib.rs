//! # Shelfwise Views
//!
//! Composed multi-shelf views. Each view is a [`ViewDefinition`] held in a
//! [`ViewRegistry`]; the [`ViewComposer`] runs one against the mediator and
//! reports which constituent shelves could not be served.

pub mod builtins;
pub mod composer;
pub mod definition;

pub use builtins::default_registry;
pub use composer::{ViewComposer, ViewResult};
pub use definition::{
    DeriveFn, Outputs, ParamKind, ParamSpec, Plan, PlanFn, QueryTemplate, ViewDefinition,
    ViewInput, ViewRegistry, ViewSummary,
};
