//! Workflow State
//!
//! The `data` section of a workflow document: the build hierarchy plus the
//! expected output paths of every configured step. It is written by
//! configure, read by every later phase, and may be extended by
//! postprocess collaborators (for example, to add regions of interest).

use std::path::PathBuf;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::workflow::hierarchy::{Build, Extra};

/// Build hierarchy and expected step outputs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WorkflowState {
    #[serde(default)]
    pub build: Build,

    /// Expected output files keyed by step name
    #[serde(default)]
    pub output_paths: IndexMap<String, Vec<PathBuf>>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl WorkflowState {
    /// Creates a state for a build with no recorded outputs.
    pub fn new(build: Build) -> Self {
        Self {
            build,
            ..Default::default()
        }
    }

    /// Records the expected outputs of a step.
    ///
    /// Returns true when the recorded list changed.
    pub fn record_outputs(&mut self, step_name: &str, paths: Vec<PathBuf>) -> bool {
        if self.output_paths.get(step_name) == Some(&paths) {
            return false;
        }
        debug!("Recording {} output path(s) for step '{}'", paths.len(), step_name);
        self.output_paths.insert(step_name.to_string(), paths);
        true
    }

    /// Expected outputs of a step, empty if never configured.
    pub fn outputs_for(&self, step_name: &str) -> &[PathBuf] {
        self.output_paths
            .get(step_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True if configure has recorded outputs for this step.
    pub fn is_configured(&self, step_name: &str) -> bool {
        self.output_paths.contains_key(step_name)
    }

    /// Drops recorded outputs of steps no longer in the workflow.
    pub fn retain_steps<S: AsRef<str>>(&mut self, names: &[S]) -> bool {
        let before = self.output_paths.len();
        self.output_paths
            .retain(|k, _| names.iter().any(|name| name.as_ref() == k.as_str()));
        before != self.output_paths.len()
    }
}
