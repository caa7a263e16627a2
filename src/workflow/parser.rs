//! Workflow Document Parser
//!
//! Loads and saves the YAML workflow document and the optional workspace
//! file that supplies per-application defaults.
//!
//! # Example YAML Format
//!
//! ```yaml
//! steps:
//!   - thermal:
//!       class: solidification_part
//!       application: additivefoam
//!       execute:
//!         batch: true
//!         np: 2
//!         maxproc: 8
//!   - microstructure:
//!       class: microstructure_region
//!       application: exaca
//! data:
//!   build:
//!     name: B1
//!     parts:
//!       P1:
//!         layers: [50, 51]
//! myna:
//!   workspace: workspace.yaml
//! ```
//!
//! The document is shared with collaborator scripts, so every key this
//! crate does not interpret is preserved on save.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Result, WorkflowError};
use crate::persist::write_atomic;
use crate::workflow::address::HierarchyLevel;
use crate::workflow::hierarchy::Extra;
use crate::workflow::state::WorkflowState;

/// Arguments forwarded to a collaborator script, in declaration order.
pub type ArgMap = IndexMap<String, Value>;

/// Settings of one step as written in the workflow document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepSettings {
    /// Component class name
    #[serde(default)]
    pub class: String,

    /// Application providing the collaborator scripts
    #[serde(default)]
    pub application: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub configure: ArgMap,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub execute: ArgMap,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub postprocess: ArgMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,

    /// Solver executable, overriding the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Type-list override for classes outside the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<HierarchyLevel>>,

    /// Input format tag override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Output format tag override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Timestamps and paths recorded by the last configure pass.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigureRecord {
    #[serde(rename = "datetime-start", default)]
    pub datetime_start: String,

    #[serde(rename = "datetime-end", default, skip_serializing_if = "Option::is_none")]
    pub datetime_end: Option<String>,

    #[serde(rename = "input-file", default)]
    pub input_file: PathBuf,

    #[serde(rename = "output-file", default)]
    pub output_file: PathBuf,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Run-level settings (`myna` section).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunSettings {
    /// Workspace file with application defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure: Option<ConfigureRecord>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl RunSettings {
    fn is_empty(&self) -> bool {
        self.workspace.is_none() && self.configure.is_none() && self.extra.is_empty()
    }
}

/// The complete workflow document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowDocument {
    /// Ordered steps, each a single-key map `{name: settings}`
    #[serde(default)]
    pub steps: Vec<IndexMap<String, StepSettings>>,

    #[serde(default)]
    pub data: WorkflowState,

    #[serde(default, skip_serializing_if = "RunSettings::is_empty")]
    pub myna: RunSettings,

    #[serde(flatten)]
    pub extra: Extra,
}

impl WorkflowDocument {
    /// Step names in workflow order (entries with a single key only).
    pub fn step_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|entry| entry.keys().next().map(String::as_str))
            .collect()
    }

    /// Appends a step (builder style, mostly for tests).
    pub fn with_step(mut self, name: impl Into<String>, settings: StepSettings) -> Self {
        let mut entry = IndexMap::new();
        entry.insert(name.into(), settings);
        self.steps.push(entry);
        self
    }
}

/// Loads a workflow document from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use layerflow::workflow::parser::load_document;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let doc = load_document("input.yaml")?;
///     println!("Loaded {} steps", doc.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_document(path: impl AsRef<Path>) -> Result<WorkflowDocument> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", content.len());

    let doc: WorkflowDocument = serde_yaml::from_str(&content).map_err(|e| {
        WorkflowError::config(format!(
            "failed to parse workflow '{}': {}",
            path.display(),
            e
        ))
    })?;

    debug!("Parsed {} step entries", doc.steps.len());
    Ok(doc)
}

/// Writes a workflow document atomically.
pub fn save_document(path: impl AsRef<Path>, doc: &WorkflowDocument) -> Result<()> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(doc)?;
    write_atomic(path, yaml.as_bytes())?;
    info!("Saved workflow to {}", path.display());
    Ok(())
}

/// Defaults for one (application, class) pair.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkspaceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    #[serde(default)]
    pub configure: ArgMap,

    #[serde(default)]
    pub execute: ArgMap,

    #[serde(default)]
    pub postprocess: ArgMap,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Workspace file: `application → class → defaults`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Workspace(IndexMap<String, IndexMap<String, WorkspaceEntry>>);

impl Workspace {
    /// Defaults for a step, if the workspace defines any.
    pub fn entry(&self, application: &str, class: &str) -> Option<&WorkspaceEntry> {
        self.0.get(application)?.get(class)
    }

    pub fn insert(&mut self, application: &str, class: &str, entry: WorkspaceEntry) {
        self.0
            .entry(application.to_string())
            .or_default()
            .insert(class.to_string(), entry);
    }
}

/// Loads a workspace file.
pub fn load_workspace(path: impl AsRef<Path>) -> Result<Workspace> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
    let workspace = serde_yaml::from_str(&content).map_err(|e| {
        WorkflowError::config(format!(
            "failed to parse workspace '{}': {}",
            path.display(),
            e
        ))
    })?;
    debug!("Loaded workspace from {}", path.display());
    Ok(workspace)
}

/// Loads the workspace referenced by a document, resolving a relative
/// path against the document's directory.
pub fn load_document_workspace(doc: &WorkflowDocument, doc_dir: &Path) -> Result<Workspace> {
    match &doc.myna.workspace {
        Some(path) if path.is_absolute() => load_workspace(path),
        Some(path) => load_workspace(doc_dir.join(path)),
        None => Ok(Workspace::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DOC: &str = r#"
steps:
  - thermal:
      class: solidification_part
      application: additivefoam
      execute:
        batch: true
        np: 2
      custom_key: kept
  - micro:
      class: microstructure_part
      application: exaca
data:
  build:
    name: B1
    parts:
      P1:
        layers: [1, 2]
myna:
  workspace: ws.yaml
notes: free-form
"#;

    #[test]
    fn test_parse_document() {
        let doc: WorkflowDocument = serde_yaml::from_str(DOC).unwrap();
        assert_eq!(doc.step_names(), vec!["thermal", "micro"]);

        let thermal = &doc.steps[0]["thermal"];
        assert_eq!(thermal.class, "solidification_part");
        assert_eq!(thermal.execute["np"], Value::from(2));
        assert!(thermal.extra.contains_key("custom_key"));

        assert_eq!(doc.data.build.parts["P1"].layers, vec![1, 2]);
        assert_eq!(doc.myna.workspace, Some(PathBuf::from("ws.yaml")));
        assert!(doc.extra.contains_key("notes"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.yaml");
        let doc: WorkflowDocument = serde_yaml::from_str(DOC).unwrap();

        save_document(&path, &doc).unwrap();
        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_load_missing_document() {
        let result = load_document("/nonexistent/input.yaml");
        assert!(matches!(result, Err(WorkflowError::Io { .. })));
    }

    #[test]
    fn test_load_malformed_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "steps: {not: [a list").unwrap();

        assert!(matches!(load_document(&path), Err(WorkflowError::Configuration(_))));
    }

    #[test]
    fn test_workspace_lookup() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("ws.yaml"),
            "additivefoam:\n  solidification_part:\n    executable: foamRun\n    execute:\n      np: 4\n",
        )
        .unwrap();

        let doc: WorkflowDocument = serde_yaml::from_str(DOC).unwrap();
        let workspace = load_document_workspace(&doc, dir.path()).unwrap();

        let entry = workspace.entry("additivefoam", "solidification_part").unwrap();
        assert_eq!(entry.executable.as_deref(), Some("foamRun"));
        assert_eq!(entry.execute["np"], Value::from(4));
        assert!(workspace.entry("exaca", "microstructure_part").is_none());
    }

    #[test]
    fn test_no_workspace_is_empty() {
        let doc = WorkflowDocument::default();
        let workspace = load_document_workspace(&doc, Path::new(".")).unwrap();
        assert!(workspace.entry("any", "thing").is_none());
    }
}
