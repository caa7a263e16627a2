//! Configure Pass
//!
//! Turns a workflow document into concrete case directories:
//!
//! 1. Load and validate the document, resolve the step graph
//! 2. Create every case directory and write its context file
//! 3. Record each step's expected output paths in the `data` section
//! 4. Save the document, but only if something changed
//!
//! Running configure twice on an unchanged document writes nothing the
//! second time.

use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info};

use crate::error::{Result, WorkflowError};
use crate::workflow::address::{AddressScheme, Coordinate};
use crate::workflow::context::write_step_contexts;
use crate::workflow::model::{check_artifact, CaseStatus, StepGraph};
use crate::workflow::parser::{load_document, load_document_workspace, save_document, ConfigureRecord};
use crate::workflow::validator::{check_first_step_input, validate_document};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Options of a configure pass.
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    /// Where to save the configured document; defaults to the input file
    pub output: Option<PathBuf>,
    /// Rewrite context files and the document even when unchanged
    pub overwrite: bool,
}

/// What configure found for one step.
#[derive(Debug, Clone, Default)]
pub struct StepConfigureReport {
    pub name: String,
    pub cases: usize,
    pub contexts_written: usize,
    pub inputs: Vec<(PathBuf, CaseStatus)>,
    pub outputs: Vec<(PathBuf, CaseStatus)>,
}

/// Result of a configure pass.
#[derive(Debug, Clone, Default)]
pub struct ConfigureReport {
    pub steps: Vec<StepConfigureReport>,
    pub warnings: Vec<String>,
    /// True when the document was rewritten
    pub saved: bool,
}

impl ConfigureReport {
    /// Total number of files written (context files plus the document).
    pub fn files_written(&self) -> usize {
        self.steps.iter().map(|s| s.contexts_written).sum::<usize>() + usize::from(self.saved)
    }
}

/// Absolute form of a path without requiring it to exist.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| WorkflowError::io(".", e))?;
    Ok(cwd.join(path))
}

/// Runs the configure pass on a workflow document.
pub fn configure(input: &Path, options: &ConfigureOptions) -> Result<ConfigureReport> {
    let input = absolute(input)?;
    let output = match &options.output {
        Some(path) => absolute(path)?,
        None => input.clone(),
    };
    let started = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let root = input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut doc = load_document(&input)?;
    validate_document(&doc)?;
    let workspace = load_document_workspace(&doc, &root)?;
    let graph = StepGraph::from_document(&doc, &workspace)?;
    let scheme = AddressScheme::new(&root);

    let mut report = ConfigureReport::default();
    report.warnings.extend(check_first_step_input(&graph));

    let step_names: Vec<String> = doc.step_names().into_iter().map(String::from).collect();
    let mut changed = doc.data.retain_steps(&step_names);

    for step in graph.steps() {
        info!("Configuring step '{}' ({})", step.name, step.class);
        let build = &doc.data.build;

        let cases = step.output_cases(&scheme, build);
        let dirs: Vec<(Coordinate, PathBuf)> = cases
            .iter()
            .map(|case| (case.coordinate.clone(), case.dir.clone()))
            .collect();
        let contexts_written = write_step_contexts(step, &dirs, build, &input, options.overwrite)?;

        let mut step_report = StepConfigureReport {
            name: step.name.clone(),
            cases: cases.len(),
            contexts_written,
            ..Default::default()
        };

        if step.input.is_some() && graph.predecessor(step.index).is_some() {
            let files = graph.input_files(step.index, &scheme, build);
            let format = graph.predecessor(step.index).and_then(|p| p.output);
            info!("  > Expecting input for step '{}':", step.name);
            step_report.inputs = files
                .into_iter()
                .map(|path| {
                    let status = check_artifact(&path, format);
                    info!("    - {} ({:?})", path.display(), status);
                    (path, status)
                })
                .collect();
        }

        if step.output.is_some() {
            let files: Vec<PathBuf> = cases.into_iter().map(|case| case.path).collect();
            info!("  > Expecting output for step '{}':", step.name);
            step_report.outputs = step.check_output_files(&files);
            for (path, status) in &step_report.outputs {
                info!("    - {} ({:?})", path.display(), status);
            }
            changed |= doc.data.record_outputs(&step.name, files);
        }

        info!("  > '{}' complete", step.name);
        report.steps.push(step_report);
    }

    if changed || options.overwrite || output != input {
        let previous = doc.myna.configure.take().unwrap_or_default();
        doc.myna.configure = Some(ConfigureRecord {
            datetime_start: started,
            datetime_end: Some(Local::now().format(TIMESTAMP_FORMAT).to_string()),
            input_file: input.clone(),
            output_file: output.clone(),
            extra: previous.extra,
        });
        save_document(&output, &doc)?;
        report.saved = true;
    } else {
        debug!("Workflow data unchanged; {} not rewritten", output.display());
    }

    info!(
        "Configured {} step(s), {} file(s) written",
        report.steps.len(),
        report.files_written()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::CONTEXT_FILE_NAME;
    use std::fs;
    use tempfile::tempdir;

    const DOC: &str = r#"
steps:
  - A:
      class: custom
      application: app
      types: [part, layer]
      output: gv
      output_template: a.csv
  - B:
      class: custom
      application: app
      types: [part, layer]
      input: gv
      output: gv
      output_template: b.csv
data:
  build:
    name: B1
    parts:
      P1:
        layers: [1, 2]
"#;

    fn write_doc(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("input.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_configure_creates_cases_and_records_outputs() {
        let dir = tempdir().unwrap();
        let input = write_doc(dir.path(), DOC);

        let report = configure(&input, &ConfigureOptions::default()).unwrap();
        assert!(report.saved);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].cases, 2);
        assert!(dir.path().join("B1/P1/1/A").join(CONTEXT_FILE_NAME).exists());
        assert!(dir.path().join("B1/P1/2/B").join(CONTEXT_FILE_NAME).exists());

        let doc = load_document(&input).unwrap();
        assert_eq!(
            doc.data.outputs_for("A"),
            &[dir.path().join("B1/P1/1/A/a.csv"), dir.path().join("B1/P1/2/A/a.csv")]
        );
        assert!(doc.myna.configure.is_some());

        // B's inputs are A's outputs, not yet produced
        let inputs: Vec<&PathBuf> = report.steps[1].inputs.iter().map(|(p, _)| p).collect();
        assert_eq!(inputs, doc.data.outputs_for("A").iter().collect::<Vec<_>>());
        assert!(report.steps[1].inputs.iter().all(|(_, s)| *s == CaseStatus::Missing));
    }

    #[test]
    fn test_configure_twice_writes_nothing() {
        let dir = tempdir().unwrap();
        let input = write_doc(dir.path(), DOC);

        configure(&input, &ConfigureOptions::default()).unwrap();
        let saved = fs::read_to_string(&input).unwrap();

        let second = configure(&input, &ConfigureOptions::default()).unwrap();
        assert_eq!(second.files_written(), 0);
        assert!(!second.saved);
        assert_eq!(fs::read_to_string(&input).unwrap(), saved);
    }

    #[test]
    fn test_configure_overwrite_rewrites() {
        let dir = tempdir().unwrap();
        let input = write_doc(dir.path(), DOC);
        configure(&input, &ConfigureOptions::default()).unwrap();

        let options = ConfigureOptions {
            overwrite: true,
            ..Default::default()
        };
        let report = configure(&input, &options).unwrap();
        assert_eq!(report.files_written(), 5);
    }

    #[test]
    fn test_first_step_with_input_warns_but_proceeds() {
        let dir = tempdir().unwrap();
        let body = DOC.replace("  - A:\n      class: custom\n      application: app\n      types: [part, layer]\n      output: gv", "  - A:\n      class: custom\n      application: app\n      types: [part, layer]\n      input: region\n      output: gv");
        let input = write_doc(dir.path(), &body);

        let report = configure(&input, &ConfigureOptions::default()).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("'A'"));
        assert!(report.steps[0].inputs.is_empty());
    }

    #[test]
    fn test_configure_separate_output_file() {
        let dir = tempdir().unwrap();
        let input = write_doc(dir.path(), DOC);
        let output = dir.path().join("configured.yaml");
        let options = ConfigureOptions {
            output: Some(output.clone()),
            ..Default::default()
        };

        configure(&input, &options).unwrap();
        let doc = load_document(&output).unwrap();
        assert_eq!(doc.myna.configure.unwrap().output_file, output);
        assert!(load_document(&input).unwrap().data.output_paths.is_empty());
    }

    #[test]
    fn test_configure_invalid_document() {
        let dir = tempdir().unwrap();
        let input = write_doc(dir.path(), "steps: []\n");
        assert!(matches!(
            configure(&input, &ConfigureOptions::default()),
            Err(WorkflowError::Configuration(_))
        ));
    }
}
