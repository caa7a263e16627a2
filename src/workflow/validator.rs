//! Workflow Validation
//!
//! Checks a workflow document before anything touches the filesystem:
//! - Step entry shape (one name per entry, no duplicates)
//! - Step fields (class, application, type-list overrides)
//! - Build hierarchy references (build region part lists)
//!
//! Problems that would make configure meaningless are collected and
//! returned as a single [`WorkflowError::Configuration`]. Conditions that
//! only limit what a step can do (a first step that expects input) are
//! logged as warnings.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::error::{Result, WorkflowError};
use crate::workflow::address::TypeList;
use crate::workflow::components;
use crate::workflow::model::StepGraph;
use crate::workflow::parser::{StepSettings, WorkflowDocument};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkflow,
    MalformedEntry { index: usize, names: usize },
    DuplicateStepName(String),
    EmptyStepName,
    EmptyClass(String),
    UnknownClass { step: String, class: String },
    InvalidTypes { step: String, reason: String },
    EmptyBuildName,
    UnknownPart { build_region: String, part: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::MalformedEntry { index, names } => write!(
                f,
                "Step entry {} must have exactly one name, found {}",
                index, names
            ),
            Self::DuplicateStepName(name) => write!(f, "Duplicate step name: '{}'", name),
            Self::EmptyStepName => write!(f, "Step has empty or whitespace-only name"),
            Self::EmptyClass(step) => write!(f, "Step '{}' has no class specified", step),
            Self::UnknownClass { step, class } => write!(
                f,
                "Step '{}': class '{}' is not registered and no types are given",
                step, class
            ),
            Self::InvalidTypes { step, reason } => write!(f, "Step '{}': {}", step, reason),
            Self::EmptyBuildName => write!(f, "Build has no name"),
            Self::UnknownPart { build_region, part } => write!(
                f,
                "Build region '{}' lists unknown part '{}'",
                build_region, part
            ),
        }
    }
}

/// Validates a single step's fields.
fn validate_step(name: &str, settings: &StepSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if name.trim().is_empty() {
        errors.push(ValidationError::EmptyStepName);
        return errors;
    }

    if settings.class.trim().is_empty() {
        errors.push(ValidationError::EmptyClass(name.to_string()));
    } else if settings.types.is_none() && components::lookup(&settings.class).is_none() {
        errors.push(ValidationError::UnknownClass {
            step: name.to_string(),
            class: settings.class.clone(),
        });
    }

    if let Some(levels) = &settings.types {
        if let Err(e) = TypeList::new(levels) {
            errors.push(ValidationError::InvalidTypes {
                step: name.to_string(),
                reason: e.to_string(),
            });
        }
    }

    if settings.application.trim().is_empty() {
        warn!(
            "Step '{}': no application given, collaborator scripts cannot be located",
            name
        );
    }

    if settings.extra.contains_key("exec") {
        warn!(
            "Step '{}': 'exec' is obsolete, use 'executable' instead",
            name
        );
    }

    errors
}

/// Validates the hierarchy references of the build.
fn validate_build(doc: &WorkflowDocument) -> Vec<ValidationError> {
    let build = &doc.data.build;
    let mut errors = Vec::new();

    if build.name.trim().is_empty() {
        errors.push(ValidationError::EmptyBuildName);
    }

    for (name, region) in &build.build_regions {
        for part in &region.partlist {
            if !build.parts.contains_key(part) && !region.parts.contains_key(part) {
                errors.push(ValidationError::UnknownPart {
                    build_region: name.clone(),
                    part: part.clone(),
                });
            }
        }
    }

    errors
}

/// Validates the entire workflow document.
///
/// Performs the following checks:
/// 1. Workflow is not empty
/// 2. Every entry has exactly one step name
/// 3. No duplicate step names
/// 4. All steps have valid fields
/// 5. Build region part lists reference existing parts
pub fn validate_document(doc: &WorkflowDocument) -> Result<()> {
    info!("Validating workflow with {} steps", doc.steps.len());

    if doc.steps.is_empty() {
        return Err(WorkflowError::config(ValidationError::EmptyWorkflow.to_string()));
    }

    let mut all_errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (index, entry) in doc.steps.iter().enumerate() {
        if entry.len() != 1 {
            all_errors.push(ValidationError::MalformedEntry {
                index,
                names: entry.len(),
            });
            continue;
        }
        for (name, settings) in entry {
            if !seen.insert(name.as_str()) {
                all_errors.push(ValidationError::DuplicateStepName(name.clone()));
            }
            all_errors.extend(validate_step(name, settings));
        }
    }

    all_errors.extend(validate_build(doc));

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(WorkflowError::config(error_messages.join("\n")));
    }

    debug!("Workflow steps: {:?}", doc.step_names());
    Ok(())
}

/// Warns when the first step declares an input format, since no step
/// precedes it to produce one. Returns the warning for callers that report.
pub fn check_first_step_input(graph: &StepGraph) -> Option<String> {
    let first = graph.get(0)?;
    let input = first.input?;
    let message = format!(
        "Step '{}' is the first step but requires '{}' input; there is nothing to read from",
        first.name, input
    );
    warn!("{}", message);
    Some(message)
}
