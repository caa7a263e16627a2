//! Workflow Execution Module
//!
//! Runs the collaborator scripts of each step as OS processes.
//!
//! # Architecture
//!
//! - [`launch`]: Command line, environment and executable checks
//! - [`scheduler`]: Serial and batch admission scheduling
//! - [`engine`]: Step lifecycle runner

pub mod engine;
pub mod launch;
pub mod scheduler;

pub use engine::{RunOptions, RunReport, Runner, StepReport, StepState};
pub use launch::{ExecuteSettings, Launch};
pub use scheduler::{AdmissionPolicy, BatchScheduler, RunningProcess};
