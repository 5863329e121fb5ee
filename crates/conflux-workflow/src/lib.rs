//! Workflow execution engine for Conflux.
//!
//! This crate provides:
//! - Units of work: named async tasks with inputs, outputs and bounded retries
//! - Groups running their components sequentially or in parallel
//! - The workflow orchestrator with its state machine and namespaced output store
//! - `{Component.key}` references resolved against earlier outputs
//! - Read-only execution reports
//! - `DispatchTask`, a task body that calls a `DispatchManager`
//!
//! # Example
//! ```
//! use conflux_workflow::{UnitOfWork, Workflow, WorkflowState, outputs};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let workflow = Workflow::builder("echo")
//!     .add(UnitOfWork::from_fn("Task1", |_inputs, _ctx| async { Ok(outputs([("result", "A")])) }))
//!     .add(
//!         UnitOfWork::from_fn("Task2", |inputs, _ctx| async move {
//!             Ok(outputs([("echo", inputs.get("upstream").cloned().unwrap_or_default())]))
//!         })
//!         .with_input("upstream", "{Task1.result}"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(workflow.start().await, WorkflowState::Completed);
//! assert_eq!(workflow.output("Task2.echo").unwrap().as_str(), Some("A"));
//! # }
//! ```

pub mod component;
pub mod dispatch_task;
pub mod error;
pub mod group;
pub mod reference;
pub mod report;
pub mod store;
pub mod task;
pub mod unit;
pub mod value;
pub mod workflow;

pub use component::Component;
pub use dispatch_task::DispatchTask;
pub use error::{Result, WorkflowError};
pub use group::{Group, GroupMode};
pub use report::{ComponentKind, ComponentReport, ReportState, WorkflowReport};
pub use store::OutputStore;
pub use task::{FnTask, Task, TaskContext, TaskInputs, TaskOutputs, outputs};
pub use unit::{UnitOfWork, UnitSnapshot, UnitStatus};
pub use value::Value;
pub use workflow::{Workflow, WorkflowBuilder, WorkflowState};
