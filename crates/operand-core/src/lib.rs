//! Operand orchestration for controller reconcile loops.
//!
//! A controller describes the work needed for one parent object as a set of
//! named [`Operand`]s with declared dependencies. This crate validates that
//! set once, levels it into an [`ExecutionOrder`], and runs it on every
//! reconcile pass:
//!
//! ```text
//!   operands ──► OperandGraph::build ──► ExecutionOrder  [A, B] -> [C] -> [D, F] -> [E]
//!                                              │
//!            ensure (forward) ◄────────────────┼──────────► cleanup (reverse)
//!                                              ▼
//!                                          Executor
//!                               step barrier, serial | parallel
//!                                              │
//!                                              ▼
//!                        ReconcileResult { requeue, requeue_after } / ReconcileError
//! ```
//!
//! # Module Structure
//!
//! - [`operand`]: the operand trait and requeue strategies
//! - [`graph`]: validation and leveling
//! - [`order`]: steps and execution orders
//! - [`executor`]: step-by-step execution
//! - [`operator`]: the `CompositeOperator` facade
//! - [`events`]: change events and recorders
//! - [`settings`]: engine settings and loader
//! - [`observability`]: tracing setup

pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod object;
pub mod observability;
pub mod operand;
pub mod operator;
pub mod order;
pub mod settings;

pub use context::ReconcileContext;
pub use error::{
    AggregateError, ConstructionError, OperandError, OperandFailure, ReconcileError, Result,
};
pub use events::{
    BroadcastEventRecorder, ChangeEvent, EventKind, EventRecorder, RecordedEvent,
    TracingEventRecorder,
};
pub use executor::{
    ExecutionStrategy, Executor, OperandAction, OperandOutcome, PassOutcome, StepRequeuePolicy,
};
pub use graph::OperandGraph;
pub use object::{ObjectReference, OwnerReference};
pub use operand::{ActionResult, DynOperand, Operand, RequeueStrategy};
pub use operator::{
    CompositeOperator, CompositeOperatorBuilder, DEFAULT_RETRY_PERIOD, ReconcileResult,
    SuspensionCheck,
};
pub use order::{ExecutionOrder, Step};
pub use settings::{EngineSettings, LoggingSettings};
