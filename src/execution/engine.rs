//! Workflow Runner
//!
//! Drives every selected step through its phases:
//!
//! ```text
//! Pending -> Configured -> Executed -> Postprocessed -> Valid | Invalid
//! ```
//!
//! - configure and postprocess scripts run once per step, in the workflow
//!   directory
//! - the execute script runs once per case, in the case directory, either
//!   serially or under the batch admission policy
//! - after postprocess every expected output is re-checked through its
//!   artifact format
//!
//! The workflow document is reloaded before each step, so hierarchy added by
//! an earlier postprocess script is visible to later steps.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::error::{Result, WorkflowError};
use crate::execution::launch::{find_executable, script_path, ExecuteSettings, Launch};
use crate::execution::scheduler::{run_batch, run_serial, AdmissionPolicy};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::address::AddressScheme;
use crate::workflow::configure::{absolute, configure, ConfigureOptions, ConfigureReport};
use crate::workflow::context::{env as env_vars, StepEnvironment};
use crate::workflow::model::{check_artifact, CaseStatus, Phase, Step, StepGraph};
use crate::workflow::parser::{load_document, load_document_workspace};

/// Default interval between batch status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root of the collaborator applications
    pub app_path: PathBuf,
    /// Interpreter used to run phase scripts
    pub interpreter: String,
    /// Steps to run; all when `None`
    pub steps: Option<Vec<String>>,
    /// Relaunch cases whose outputs are already valid
    pub overwrite: bool,
    /// Log launches instead of spawning them
    pub dry_run: bool,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            app_path: std::env::var_os(env_vars::APP_PATH)
                .map(PathBuf::from)
                .unwrap_or_default(),
            interpreter: "python".to_string(),
            steps: None,
            overwrite: false,
            dry_run: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle position of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Configured,
    Executed,
    Postprocessed,
    Valid,
    Invalid,
}

/// What happened to one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub state: StepState,
    /// True when none of the phase scripts exist
    pub scripts_missing: bool,
    /// Execute launches started (or printed, in a dry run)
    pub launched: usize,
    /// Cases skipped because their output was already valid
    pub skipped_cases: usize,
    pub outputs: Vec<(PathBuf, CaseStatus)>,
    /// Command lines printed by a dry run
    pub planned: Vec<String>,
}

impl StepReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StepState::Pending,
            scripts_missing: false,
            launched: 0,
            skipped_cases: 0,
            outputs: Vec::new(),
            planned: Vec::new(),
        }
    }

    fn advance(&mut self, state: StepState) {
        self.state = state;
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub timeline: ExecutionTimeline,
    pub elapsed: Duration,
}

impl RunReport {
    /// True when every step ended valid.
    pub fn all_valid(&self) -> bool {
        self.steps.iter().all(|s| s.state == StepState::Valid)
    }
}

/// Workflow runner.
///
/// # Example
///
/// ```rust,no_run
/// use layerflow::execution::Runner;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut runner = Runner::new("input.yaml");
///     runner.set_app_path("/opt/myna/application");
///     runner.set_steps(vec!["thermal".to_string()]);
///
///     runner.configure(false)?;
///     let report = runner.run()?;
///     println!("{}", report.timeline.gantt_chart());
///     Ok(())
/// }
/// ```
pub struct Runner {
    input: PathBuf,
    options: RunOptions,
}

impl Runner {
    /// Creates a runner for a workflow document with default options.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self::with_options(input, RunOptions::default())
    }

    pub fn with_options(input: impl Into<PathBuf>, options: RunOptions) -> Self {
        Self {
            input: input.into(),
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn set_app_path(&mut self, path: impl Into<PathBuf>) {
        self.options.app_path = path.into();
    }

    pub fn set_interpreter(&mut self, interpreter: impl Into<String>) {
        self.options.interpreter = interpreter.into();
    }

    /// Restricts the run to the named steps.
    pub fn set_steps(&mut self, steps: Vec<String>) {
        self.options.steps = Some(steps).filter(|s| !s.is_empty());
    }

    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.options.overwrite = overwrite;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.options.dry_run = dry_run;
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.options.poll_interval = interval;
    }

    /// Runs the configure pass on the runner's document.
    pub fn configure(&self, overwrite: bool) -> Result<ConfigureReport> {
        configure(
            &self.input,
            &ConfigureOptions {
                output: None,
                overwrite,
            },
        )
    }

    fn selected(&self, name: &str) -> bool {
        self.options
            .steps
            .as_ref()
            .map_or(true, |steps| steps.iter().any(|s| s == name))
    }

    /// Runs every selected step in workflow order.
    ///
    /// Serial execute failures abort immediately. Batch failures are raised
    /// after every case of that step has finished.
    pub fn run(&mut self) -> Result<RunReport> {
        let start_time = Instant::now();
        let input = absolute(&self.input)?;
        let mut timeline = ExecutionTimeline::new();

        if !self.options.dry_run {
            find_executable(&self.options.interpreter)?;
        }

        let names: Vec<String> = load_document(&input)?
            .step_names()
            .into_iter()
            .map(String::from)
            .collect();

        if let Some(filter) = &self.options.steps {
            for wanted in filter {
                if !names.contains(wanted) {
                    warn!("Step '{}' is not part of the workflow", wanted);
                }
            }
        }

        info!(
            "Starting run of {} step(s) (dry run: {}, overwrite: {})",
            names.len(),
            self.options.dry_run,
            self.options.overwrite
        );

        let mut reports = Vec::new();
        for name in &names {
            if !self.selected(name) {
                info!("Skipping step '{}' (not selected)", name);
                continue;
            }
            let report = self.run_step(&input, name, &mut timeline)?;
            reports.push(report);
        }

        let elapsed = start_time.elapsed();
        info!("Run finished in {:.2?}", elapsed);
        Ok(RunReport {
            steps: reports,
            timeline,
            elapsed,
        })
    }

    /// Runs one step by name, reloading the document first.
    fn run_step(&self, input: &Path, name: &str, timeline: &mut ExecutionTimeline) -> Result<StepReport> {
        let root = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let doc = load_document(input)?;
        let workspace = load_document_workspace(&doc, &root)?;
        let graph = StepGraph::from_document(&doc, &workspace)?;
        let step = graph
            .find(name)
            .ok_or_else(|| WorkflowError::config(format!("step '{}' disappeared from the workflow", name)))?;
        let build = &doc.data.build;
        let scheme = AddressScheme::new(&root);
        let app_path = absolute(&self.options.app_path)?;

        info!("Running step '{}' ({} / {})", step.name, step.application, step.class);
        let mut report = StepReport::new(&step.name);
        let environment = StepEnvironment::new(
            input,
            step,
            graph.predecessor(step.index),
            &app_path,
        );

        let scripts: Vec<(Phase, bool)> = Phase::ALL
            .iter()
            .map(|phase| (*phase, script_path(&app_path, step, *phase).exists()))
            .collect();
        let has_script = |phase: Phase| scripts.iter().any(|(p, exists)| *p == phase && *exists);

        let cases = step.output_cases(&scheme, build);

        if scripts.iter().all(|(_, exists)| !exists) {
            report.scripts_missing = true;
            warn!(
                "No scripts found for step '{}' under {}; expected outputs:",
                step.name,
                app_path.join(&step.application).join(&step.class).display()
            );
            for case in &cases {
                info!("    - {}", case.path.display());
            }
        }

        // configure
        if has_script(Phase::Configure) {
            let launch = Launch::new(step, Phase::Configure, &self.options.interpreter, &environment, &build.name, &root);
            self.run_phase(step, Phase::Configure, vec![launch], None, &mut report, timeline)?;
        } else {
            timeline.phase_event(&step.name, Phase::Configure, EventType::Skipped);
        }
        report.advance(StepState::Configured);

        // execute
        if has_script(Phase::Execute) {
            let settings = ExecuteSettings::from_args(&step.execute);
            let mut launches = Vec::new();
            for case in &cases {
                if !self.options.overwrite && step.output.is_some() {
                    let status = check_artifact(&case.path, step.output);
                    if status == CaseStatus::Valid {
                        info!("  > Output already valid, skipping {}", case.dir.display());
                        report.skipped_cases += 1;
                        continue;
                    }
                }
                launches.push(
                    Launch::new(step, Phase::Execute, &self.options.interpreter, &environment, &build.name, &root)
                        .in_case(&case.dir)
                        .with_settings(&settings),
                );
            }
            if launches.is_empty() {
                timeline.phase_event(&step.name, Phase::Execute, EventType::Skipped);
            } else {
                if !self.options.dry_run {
                    if let Some(mpiexec) = &settings.mpiexec {
                        find_executable(mpiexec)?;
                    }
                }
                report.launched = launches.len();
                self.run_phase(step, Phase::Execute, launches, Some(&settings), &mut report, timeline)?;
            }
        } else {
            timeline.phase_event(&step.name, Phase::Execute, EventType::Skipped);
        }
        report.advance(StepState::Executed);

        // postprocess
        if has_script(Phase::Postprocess) {
            let launch = Launch::new(step, Phase::Postprocess, &self.options.interpreter, &environment, &build.name, &root);
            self.run_phase(step, Phase::Postprocess, vec![launch], None, &mut report, timeline)?;
        } else {
            timeline.phase_event(&step.name, Phase::Postprocess, EventType::Skipped);
        }
        report.advance(StepState::Postprocessed);

        // validity
        let files: Vec<PathBuf> = cases.into_iter().map(|c| c.path).collect();
        report.outputs = step.check_output_files(&files);
        report.advance(self.final_state(step, &report.outputs));
        Ok(report)
    }

    fn final_state(&self, step: &Step, outputs: &[(PathBuf, CaseStatus)]) -> StepState {
        if step.output.is_none() || outputs.is_empty() {
            info!("Step '{}' declares no output files", step.name);
            return StepState::Valid;
        }
        let valid = outputs.iter().filter(|(_, s)| *s == CaseStatus::Valid).count();
        if valid == outputs.len() {
            info!("All {} output file(s) are valid for step '{}'", valid, step.name);
            StepState::Valid
        } else {
            warn!(
                "Only {} of {} output file(s) are valid for step '{}'",
                valid,
                outputs.len(),
                step.name
            );
            StepState::Invalid
        }
    }

    /// Launches one phase, recording it on the timeline.
    fn run_phase(
        &self,
        step: &Step,
        phase: Phase,
        launches: Vec<Launch>,
        settings: Option<&ExecuteSettings>,
        report: &mut StepReport,
        timeline: &mut ExecutionTimeline,
    ) -> Result<()> {
        timeline.phase_event(&step.name, phase, EventType::Started);

        if self.options.dry_run {
            for launch in &launches {
                info!("[DRY RUN] {}", launch);
                report.planned.push(launch.command_line());
            }
            timeline.phase_event(&step.name, phase, EventType::Completed);
            return Ok(());
        }

        let result = match settings {
            Some(settings) if settings.batch => {
                let policy = if settings.mpiexec.is_some() {
                    AdmissionPolicy::Unbounded
                } else {
                    AdmissionPolicy::Budget {
                        maxproc: settings.maxproc,
                    }
                };
                run_batch(&launches, policy, self.options.poll_interval, |l| l.spawn())
            }
            _ => run_serial(&launches, |l| l.spawn()),
        };

        match result {
            Ok(_) => {
                timeline.phase_event(&step.name, phase, EventType::Completed);
                Ok(())
            }
            Err(e) => {
                error!("Step '{}' {} failed: {}", step.name, phase, e);
                timeline.phase_event(&step.name, phase, EventType::Failed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const DOC: &str = r#"
steps:
  - thermal:
      class: custom
      application: app
      types: [part, layer]
      output: temperature
      output_template: out.csv
      execute:
        np: 1
data:
  build:
    name: B1
    parts:
      P1:
        layers: [1, 2]
"#;

    const VALID_CSV: &str = "x (m),y (m),t (k)\n0,0,300\n";

    /// Workflow directory plus an application tree with the given scripts.
    fn setup(doc: &str, scripts: &[(&str, &str)]) -> (TempDir, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.yaml");
        fs::write(&input, doc).unwrap();
        let apps = dir.path().join("apps");
        let class_dir = apps.join("app").join("custom");
        fs::create_dir_all(&class_dir).unwrap();
        for (name, body) in scripts {
            fs::write(class_dir.join(name), body).unwrap();
        }
        (dir, input, apps)
    }

    fn runner(input: &Path, apps: &Path) -> Runner {
        let mut runner = Runner::new(input);
        runner.set_app_path(apps);
        runner.set_interpreter("sh");
        runner.set_poll_interval(Duration::from_millis(10));
        runner
    }

    #[test]
    fn test_run_writes_outputs_and_validates() {
        let script = format!("printf '{}' > out.csv\n", VALID_CSV.replace('\n', "\\n"));
        let (dir, input, apps) = setup(DOC, &[("execute.py", &script)]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();

        let report = runner.run().unwrap();
        assert_eq!(report.steps.len(), 1);
        let step = &report.steps[0];
        assert_eq!(step.launched, 2);
        assert_eq!(step.state, StepState::Valid);
        assert!(dir.path().join("B1/P1/2/thermal/out.csv").exists());
        assert!(report.all_valid());
    }

    #[test]
    fn test_valid_cases_are_skipped() {
        let (dir, input, apps) = setup(DOC, &[("execute.py", "exit 1\n")]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();
        for layer in ["1", "2"] {
            fs::write(dir.path().join("B1/P1").join(layer).join("thermal/out.csv"), VALID_CSV).unwrap();
        }

        let report = runner.run().unwrap();
        assert_eq!(report.steps[0].skipped_cases, 2);
        assert_eq!(report.steps[0].launched, 0);

        runner.set_overwrite(true);
        assert!(matches!(runner.run(), Err(WorkflowError::SubprocessFailure(_))));
    }

    #[test]
    fn test_missing_scripts_report_expected_paths() {
        let (_dir, input, apps) = setup(DOC, &[]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();

        let report = runner.run().unwrap();
        let step = &report.steps[0];
        assert!(step.scripts_missing);
        assert_eq!(step.launched, 0);
        assert_eq!(step.outputs.len(), 2);
        assert!(step.outputs.iter().all(|(_, s)| *s == CaseStatus::Missing));
        assert_eq!(step.state, StepState::Invalid);
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let (dir, input, apps) = setup(DOC, &[("configure.py", "touch configured\n"), ("execute.py", "touch ran\n")]);
        let mut runner = runner(&input, &apps);
        runner.set_dry_run(true);
        runner.configure(false).unwrap();

        let report = runner.run().unwrap();
        let step = &report.steps[0];
        assert_eq!(step.planned.len(), 3);
        assert!(step.planned[0].contains("configure.py"));
        assert!(!dir.path().join("configured").exists());
        assert!(!dir.path().join("B1/P1/1/thermal/ran").exists());
    }

    #[test]
    fn test_serial_failure_aborts() {
        let (_dir, input, apps) = setup(DOC, &[("execute.py", "exit 2\n")]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();

        match runner.run() {
            Err(WorkflowError::SubprocessFailure(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].exit_code, Some(2));
            }
            other => panic!("expected failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_batch_failure_collects_all_cases() {
        let doc = DOC.replace("        np: 1", "        np: 1\n        batch: true");
        let (_dir, input, apps) = setup(&doc, &[("execute.py", "exit 2\n")]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();

        match runner.run() {
            Err(WorkflowError::SubprocessFailure(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("expected failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_environment_reaches_scripts() {
        let script = "echo \"$MYNA_STEP_NAME $MYNA_STEP_INDEX\" > env.txt\n";
        let (dir, input, apps) = setup(DOC, &[("execute.py", script)]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();
        runner.run().unwrap();

        let written = fs::read_to_string(dir.path().join("B1/P1/1/thermal/env.txt")).unwrap();
        assert_eq!(written.trim(), "thermal 0");
    }

    #[test]
    fn test_step_filter() {
        let (_dir, input, apps) = setup(DOC, &[]);
        let mut runner = runner(&input, &apps);
        runner.configure(false).unwrap();
        runner.set_steps(vec!["other".to_string()]);

        let report = runner.run().unwrap();
        assert!(report.steps.is_empty());
    }

    #[test]
    fn test_missing_interpreter() {
        let (_dir, input, apps) = setup(DOC, &[]);
        let mut runner = runner(&input, &apps);
        runner.set_interpreter("no-such-interpreter-here");

        assert!(matches!(runner.run(), Err(WorkflowError::MissingExecutable(_))));
    }
}
