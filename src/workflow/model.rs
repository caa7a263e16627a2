//! Workflow Data Model
//!
//! A [`Step`] is one stage of the chain: a component class bound to an
//! application, resolved against the component registry and the settings
//! in the workflow document. A [`StepGraph`] is the ordered sequence of
//! steps. Each step's input is its predecessor's output, so the graph only
//! needs the step's index to find where its inputs come from.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::artifact::ArtifactFormat;
use crate::error::{Result, WorkflowError};
use crate::workflow::address::{AddressScheme, Case, TypeList};
use crate::workflow::components;
use crate::workflow::hierarchy::Build;
use crate::workflow::parser::{ArgMap, StepSettings, WorkflowDocument, Workspace, WorkspaceEntry};

/// The three collaborator phases of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Configure,
    Execute,
    Postprocess,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Configure, Phase::Execute, Phase::Postprocess];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Execute => "execute",
            Self::Postprocess => "postprocess",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one expected artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    /// File exists and satisfies its format
    Valid,
    /// File exists but fails its format's check
    Invalid,
    /// File does not exist
    Missing,
    /// File exists; the step declares no output format to check against
    Unchecked,
}

impl CaseStatus {
    /// True when the case needs no regeneration.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Valid | Self::Unchecked)
    }
}

/// A resolved workflow step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    /// Position in the workflow, starting at 0
    pub index: usize,
    pub class: String,
    pub application: String,
    pub types: TypeList,
    pub input: Option<ArtifactFormat>,
    pub output: Option<ArtifactFormat>,
    pub output_template: String,
    /// Template used to locate inputs inside the predecessor's cases
    pub input_template: Option<String>,
    pub executable: Option<String>,
    pub configure: ArgMap,
    pub execute: ArgMap,
    pub postprocess: ArgMap,
}

impl Step {
    /// Creates a step from document settings, filling the class defaults
    /// and the workspace defaults for its (application, class) pair.
    ///
    /// Unknown classes are accepted only when the settings declare `types`.
    pub fn from_settings(
        name: &str,
        index: usize,
        settings: &StepSettings,
        defaults: Option<&WorkspaceEntry>,
    ) -> Result<Self> {
        let registered = components::lookup(&settings.class);

        let types = match (&settings.types, registered) {
            (Some(levels), _) => TypeList::new(levels)?,
            (None, Some(class)) => TypeList::new(class.types)?,
            (None, None) => {
                return Err(WorkflowError::config(format!(
                    "step '{}': component class '{}' is not valid (known classes: {})",
                    name,
                    settings.class,
                    components::class_names().join(", ")
                )))
            }
        };

        let input = resolve_format(name, settings.input.as_deref())?
            .or_else(|| registered.and_then(|c| c.input));
        let output = resolve_format(name, settings.output.as_deref())?
            .or_else(|| registered.and_then(|c| c.output));

        let output_template = match settings.output_template.as_deref() {
            Some(template) if !template.is_empty() => template.to_string(),
            _ => default_output_template(&settings.class, name, output),
        };

        let input_template = settings
            .input_template
            .clone()
            .filter(|t| !t.is_empty());

        Ok(Self {
            name: name.to_string(),
            index,
            class: settings.class.clone(),
            application: settings.application.clone(),
            types,
            input,
            output,
            output_template,
            input_template,
            executable: settings
                .executable
                .clone()
                .or_else(|| defaults.and_then(|d| d.executable.clone())),
            configure: merge_args(defaults.map(|d| &d.configure), &settings.configure),
            execute: merge_args(defaults.map(|d| &d.execute), &settings.execute),
            postprocess: merge_args(defaults.map(|d| &d.postprocess), &settings.postprocess),
        })
    }

    /// Arguments declared for a phase.
    pub fn args(&self, phase: Phase) -> &ArgMap {
        match phase {
            Phase::Configure => &self.configure,
            Phase::Execute => &self.execute,
            Phase::Postprocess => &self.postprocess,
        }
    }

    /// Every case of this step with its expected output path.
    pub fn output_cases(&self, scheme: &AddressScheme, build: &Build) -> Vec<Case> {
        scheme.resolve_cases(&self.name, &self.types, &self.output_template, build)
    }

    /// Expected output paths, in case order.
    pub fn get_output_files(&self, scheme: &AddressScheme, build: &Build) -> Vec<PathBuf> {
        scheme.resolve(&self.name, &self.types, &self.output_template, build)
    }

    /// Checks expected outputs against the declared output format.
    pub fn check_output_files(&self, files: &[PathBuf]) -> Vec<(PathBuf, CaseStatus)> {
        files
            .iter()
            .map(|path| {
                let status = check_artifact(path, self.output);
                if status == CaseStatus::Invalid {
                    warn!(
                        "Step '{}': invalid {} output {}",
                        self.name,
                        self.output.map_or("", |f| f.tag()),
                        path.display()
                    );
                }
                (path.clone(), status)
            })
            .collect()
    }
}

/// Workspace-only keys first, then the step's own keys in declaration order.
/// A step value overrides the workspace value of the same key.
fn merge_args(workspace: Option<&ArgMap>, step: &ArgMap) -> ArgMap {
    let mut merged: ArgMap = workspace
        .into_iter()
        .flatten()
        .filter(|(key, _)| !step.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    merged.extend(step.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Checks a single file against an optional format.
pub fn check_artifact(path: &Path, format: Option<ArtifactFormat>) -> CaseStatus {
    if !path.exists() {
        return CaseStatus::Missing;
    }
    match format {
        Some(format) if format.open(path).file_is_valid() => CaseStatus::Valid,
        Some(_) => CaseStatus::Invalid,
        None => CaseStatus::Unchecked,
    }
}

/// Output template used when a step does not declare one:
/// `{class}-{step}-{format}{extension}`, or just the class name.
pub fn default_output_template(class: &str, step: &str, output: Option<ArtifactFormat>) -> String {
    match output {
        Some(format) => format!("{}-{}-{}{}", class, step, format.tag(), format.extension()),
        None => class.to_string(),
    }
}

fn resolve_format(step: &str, tag: Option<&str>) -> Result<Option<ArtifactFormat>> {
    match tag {
        None => Ok(None),
        Some(tag) => ArtifactFormat::from_tag(tag).map(Some).ok_or_else(|| {
            WorkflowError::config(format!(
                "step '{}': unknown artifact format '{}'",
                step, tag
            ))
        }),
    }
}

/// Ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepGraph {
    steps: Vec<Step>,
}

impl StepGraph {
    /// Resolves every step of a document.
    ///
    /// Steps with no input template inherit their predecessor's output
    /// template.
    pub fn from_document(doc: &WorkflowDocument, workspace: &Workspace) -> Result<Self> {
        let mut steps: Vec<Step> = Vec::with_capacity(doc.steps.len());

        for (index, entry) in doc.steps.iter().enumerate() {
            if entry.len() != 1 {
                return Err(WorkflowError::config(format!(
                    "step entry {} must have exactly one name, found {}",
                    index,
                    entry.len()
                )));
            }
            let Some((name, settings)) = entry.iter().next() else {
                continue;
            };

            let defaults = workspace.entry(&settings.application, &settings.class);
            let mut step = Step::from_settings(name, index, settings, defaults)?;
            if step.input_template.is_none() {
                step.input_template = steps.last().map(|prev| prev.output_template.clone());
            }
            debug!(
                "Step {} '{}' ({}): types {:?}, output template '{}'",
                index,
                step.name,
                step.class,
                step.types.levels(),
                step.output_template
            );
            steps.push(step);
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// The step whose outputs feed step `index`.
    pub fn predecessor(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    /// Expected output files of step `index`.
    pub fn output_files(&self, index: usize, scheme: &AddressScheme, build: &Build) -> Vec<PathBuf> {
        self.steps
            .get(index)
            .map(|step| step.get_output_files(scheme, build))
            .unwrap_or_default()
    }

    /// Input files of step `index`: the predecessor's cases resolved with
    /// this step's input template. Empty for the first step.
    pub fn input_files(&self, index: usize, scheme: &AddressScheme, build: &Build) -> Vec<PathBuf> {
        let (Some(step), Some(prev)) = (self.steps.get(index), self.predecessor(index)) else {
            return Vec::new();
        };
        let template = step
            .input_template
            .as_deref()
            .unwrap_or(&prev.output_template);
        scheme.resolve(&prev.name, &prev.types, template, build)
    }
}
