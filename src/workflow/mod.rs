//! Workflow Definition Module
//!
//! Data structures and passes for describing a multi-step workflow over a
//! build hierarchy and turning it into concrete case directories.
//!
//! # Structure
//!
//! - [`hierarchy`]: Build, part, region and build region documents
//! - [`address`]: Case addressing (type-lists, coordinates, paths)
//! - [`components`]: Component class registry
//! - [`model`]: Step and StepGraph
//! - [`parser`]: YAML document and workspace loading
//! - [`validator`]: Document validation
//! - [`state`]: Hierarchy plus expected outputs
//! - [`context`]: Per-case context files and step environment
//! - [`configure`]: The configure pass

pub mod address;
pub mod components;
pub mod configure;
pub mod context;
pub mod hierarchy;
pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use address::{AddressScheme, Case, Coordinate, HierarchyLevel, TypeList};
pub use configure::{configure, ConfigureOptions, ConfigureReport};
pub use context::{CaseContext, StepEnvironment};
pub use hierarchy::{Build, BuildRegion, Part, Region};
pub use model::{CaseStatus, Phase, Step, StepGraph};
pub use parser::{load_document, save_document, WorkflowDocument, Workspace};
pub use state::WorkflowState;
