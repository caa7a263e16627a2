//! LayerFlow - Additive Manufacturing Workflow Engine
//!
//! Chains independent simulation tools (thermal solvers, microstructure
//! codes, mesh generators) over the hierarchy of a build plate: build,
//! parts, regions and layers. Each step's scripts are launched once per
//! case directory, outputs are checked through their file format, and
//! results are merged back into per-layer bundles.
//!
//! # Architecture
//!
//! The library is organized into six main modules:
//!
//! - [`workflow`]: Workflow documents, hierarchy addressing and configure
//! - [`artifact`]: Output file formats, validity and value extraction
//! - [`execution`]: Script launching with serial and batch scheduling
//! - [`sync`]: Per-layer result accumulators and preview images
//! - [`monitoring`]: Execution timeline
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use layerflow::execution::Runner;
//! use layerflow::sync::SyncEngine;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create case directories and context files
//!     let mut runner = Runner::new("input.yaml");
//!     runner.configure(false)?;
//!
//!     // Launch every step
//!     let report = runner.run()?;
//!     println!("{}", report.timeline.gantt_chart());
//!
//!     // Merge results into per-layer bundles
//!     SyncEngine::new("input.yaml").sync()?;
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod persist;
pub mod sync;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, WorkflowError};
pub use execution::engine::Runner;
pub use sync::SyncEngine;
pub use workflow::configure::configure;
pub use workflow::model::{Step, StepGraph};
pub use workflow::parser::load_document;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "LayerFlow";
