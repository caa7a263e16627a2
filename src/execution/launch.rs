//! Process Launch Contract
//!
//! Builds the command line of one collaborator process:
//!
//! ```text
//! [mpiexec -n <np> [mpiflags]] <interpreter> <app>/<application>/<class>/<phase>.py
//!     --key value ... --flag ... [--exec <executable>]
//! ```
//!
//! Argument values are formatted with `{name}` (step name), `{build}` (build
//! name) and `$MYNA_APP_PATH` (application root). Boolean settings become a
//! bare `--flag` when true and are omitted when false.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use log::{debug, warn};
use serde_yaml::Value;

use crate::error::{Result, WorkflowError};
use crate::workflow::context::{env as env_vars, StepEnvironment};
use crate::workflow::model::{Phase, Step};
use crate::workflow::parser::ArgMap;

/// Argument keys that are no longer forwarded.
const OBSOLETE_KEYS: &[&str] = &["exec"];

/// Location of a phase script of a step.
pub fn script_path(app_path: &Path, step: &Step, phase: Phase) -> PathBuf {
    app_path
        .join(&step.application)
        .join(&step.class)
        .join(format!("{}.py", phase.as_str()))
}

/// Replaces `{name}`, `{build}` and `$MYNA_APP_PATH` in an argument.
pub fn format_placeholders(text: &str, step_name: &str, build_name: &str, app_path: &Path) -> String {
    text.replace("{name}", step_name)
        .replace("{build}", build_name)
        .replace(&format!("${}", env_vars::APP_PATH), &app_path.display().to_string())
}

fn value_to_arg(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => serde_yaml::to_string(other).ok().map(|s| s.trim().to_string()),
    }
}

/// Converts a phase's argument map into `--key value` pairs.
pub fn build_args(step: &Step, phase: Phase, build_name: &str, app_path: &Path) -> Vec<String> {
    let mut args = Vec::new();

    for (key, value) in step.args(phase) {
        if OBSOLETE_KEYS.contains(&key.as_str()) {
            warn!(
                "Step '{}' {} argument '{}' is obsolete and ignored; set 'executable: {}' on the step instead",
                step.name,
                phase,
                key,
                value_to_arg(value).unwrap_or_default()
            );
            continue;
        }
        match value {
            Value::Bool(true) => args.push(format!("--{}", key)),
            Value::Bool(false) | Value::Null => {}
            other => {
                if let Some(text) = value_to_arg(other) {
                    args.push(format!("--{}", key));
                    args.push(format_placeholders(&text, &step.name, build_name, app_path));
                }
            }
        }
    }

    if let Some(executable) = &step.executable {
        if !args.iter().any(|a| a == "--exec") {
            args.push("--exec".to_string());
            args.push(format_placeholders(executable, &step.name, build_name, app_path));
        }
    }

    args
}

/// Scheduling settings read from a step's `execute` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteSettings {
    pub batch: bool,
    /// Processors per case, capped at `maxproc` and the CPU count
    pub np: usize,
    /// Processor budget for a batch
    pub maxproc: usize,
    pub mpiexec: Option<String>,
    pub mpiflags: Option<String>,
}

impl ExecuteSettings {
    /// Reads the settings from an argument map, capping processor counts at
    /// the machine CPU count.
    pub fn from_args(args: &ArgMap) -> Self {
        Self::with_cpu_count(args, num_cpus::get())
    }

    pub fn with_cpu_count(args: &ArgMap, cpus: usize) -> Self {
        let int = |key: &str| -> Option<usize> {
            match args.get(key)? {
                Value::Number(n) => n.as_u64().map(|v| v as usize),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        let text = |key: &str| -> Option<String> {
            match args.get(key)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            }
        };

        let maxproc = int("maxproc").unwrap_or(cpus).clamp(1, cpus.max(1));
        let np = int("np").unwrap_or(1).clamp(1, maxproc);

        Self {
            batch: matches!(args.get("batch"), Some(Value::Bool(true))),
            np,
            maxproc,
            mpiexec: text("mpiexec"),
            mpiflags: text("mpiflags"),
        }
    }
}

/// A fully described process launch.
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    /// `step:phase`
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(&'static str, String)>,
    /// Case directory for per-case launches
    pub case_dir: Option<PathBuf>,
    /// Processor slots this launch occupies
    pub np: usize,
}

impl Launch {
    /// Builds the launch of one phase script.
    pub fn new(
        step: &Step,
        phase: Phase,
        interpreter: &str,
        environment: &StepEnvironment,
        build_name: &str,
        cwd: &Path,
    ) -> Self {
        let script = script_path(&environment.app_path, step, phase);
        let mut args = vec![script.display().to_string()];
        args.extend(build_args(step, phase, build_name, &environment.app_path));

        Self {
            label: format!("{}:{}", step.name, phase),
            program: interpreter.to_string(),
            args,
            cwd: cwd.to_path_buf(),
            env: environment.vars(),
            case_dir: None,
            np: 1,
        }
    }

    /// Marks the launch as running inside a case directory.
    pub fn in_case(mut self, case_dir: &Path) -> Self {
        self.cwd = case_dir.to_path_buf();
        self.case_dir = Some(case_dir.to_path_buf());
        self
    }

    /// Applies `np` and the optional MPI prefix.
    pub fn with_settings(mut self, settings: &ExecuteSettings) -> Self {
        self.np = settings.np;
        if let Some(mpiexec) = &settings.mpiexec {
            let mut args = vec!["-n".to_string(), settings.np.to_string()];
            if let Some(flags) = &settings.mpiflags {
                args.extend(flags.split_whitespace().map(str::to_string));
            }
            args.push(std::mem::replace(&mut self.program, mpiexec.clone()));
            args.append(&mut self.args);
            self.args = args;
        }
        self
    }

    /// Command line as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Prepares the `Command` without spawning it.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Spawns the process.
    pub fn spawn(&self) -> Result<Child> {
        debug!("Spawning {} in {}", self.command_line(), self.cwd.display());
        self.command().spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WorkflowError::MissingExecutable(self.program.clone()),
            std::io::ErrorKind::PermissionDenied => WorkflowError::Permission(self.program.clone()),
            _ => WorkflowError::io(&self.cwd, e),
        })
    }
}

impl fmt::Display for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.label, self.command_line())
    }
}

/// Locates an executable by path or on `PATH`.
///
/// Returns [`WorkflowError::MissingExecutable`] when nothing is found and
/// [`WorkflowError::Permission`] when the file exists without execute bits.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    let found = if candidate.components().count() > 1 {
        candidate.is_file().then(|| candidate.to_path_buf())
    } else {
        env::var_os("PATH").and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|path| path.is_file())
        })
    };

    let path = found.ok_or_else(|| WorkflowError::MissingExecutable(name.to_string()))?;
    if !is_executable(&path) {
        return Err(WorkflowError::Permission(path.display().to_string()));
    }
    Ok(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parser::StepSettings;
    use std::fs;
    use tempfile::tempdir;

    fn step_with_execute(pairs: &[(&str, Value)]) -> Step {
        let mut settings = StepSettings {
            class: "solidification_part".to_string(),
            application: "additivefoam".to_string(),
            ..Default::default()
        };
        for (key, value) in pairs {
            settings.execute.insert(key.to_string(), value.clone());
        }
        Step::from_settings("thermal", 0, &settings, None).unwrap()
    }

    #[test]
    fn test_build_args_flags_and_values() {
        let step = step_with_execute(&[
            ("batch", Value::from(true)),
            ("overwrite", Value::from(false)),
            ("np", Value::from(4)),
            ("template", Value::from("$MYNA_APP_PATH/{name}/{build}")),
        ]);
        let args = build_args(&step, Phase::Execute, "B1", Path::new("/apps"));
        assert_eq!(
            args,
            vec!["--batch", "--np", "4", "--template", "/apps/thermal/B1"]
        );
    }

    #[test]
    fn test_obsolete_exec_key_dropped() {
        let step = step_with_execute(&[("exec", Value::from("foamRun"))]);
        assert!(build_args(&step, Phase::Execute, "B1", Path::new("/apps")).is_empty());
    }

    #[test]
    fn test_executable_appended() {
        let mut step = step_with_execute(&[]);
        step.executable = Some("/opt/bin/solver".to_string());
        let args = build_args(&step, Phase::Configure, "B1", Path::new("/apps"));
        assert_eq!(args, vec!["--exec", "/opt/bin/solver"]);
    }

    #[test]
    fn test_script_path() {
        let step = step_with_execute(&[]);
        assert_eq!(
            script_path(Path::new("/apps"), &step, Phase::Postprocess),
            PathBuf::from("/apps/additivefoam/solidification_part/postprocess.py")
        );
    }

    #[test]
    fn test_execute_settings_caps() {
        let mut args = ArgMap::new();
        args.insert("np".to_string(), Value::from(16));
        args.insert("maxproc".to_string(), Value::from(6));
        args.insert("batch".to_string(), Value::from(true));

        let settings = ExecuteSettings::with_cpu_count(&args, 8);
        assert_eq!(settings.maxproc, 6);
        assert_eq!(settings.np, 6);
        assert!(settings.batch);

        let settings = ExecuteSettings::with_cpu_count(&ArgMap::new(), 4);
        assert_eq!(settings.maxproc, 4);
        assert_eq!(settings.np, 1);
        assert!(!settings.batch);
    }

    #[test]
    fn test_mpi_prefix() {
        let step = step_with_execute(&[]);
        let env = StepEnvironment::new(Path::new("/w/in.yaml"), &step, None, Path::new("/apps"));
        let settings = ExecuteSettings {
            batch: true,
            np: 2,
            maxproc: 4,
            mpiexec: Some("mpirun".to_string()),
            mpiflags: Some("--oversubscribe".to_string()),
        };
        let launch = Launch::new(&step, Phase::Execute, "python", &env, "B1", Path::new("/w"))
            .with_settings(&settings);

        assert_eq!(launch.program, "mpirun");
        assert_eq!(&launch.args[..4], &["-n", "2", "--oversubscribe", "python"]);
        assert!(launch.args[4].ends_with("execute.py"));
        assert_eq!(launch.np, 2);
    }

    #[test]
    fn test_launch_runs_in_case_dir() {
        let dir = tempdir().unwrap();
        let step = step_with_execute(&[]);
        let env = StepEnvironment::new(Path::new("/w/in.yaml"), &step, None, dir.path());
        let launch = Launch::new(&step, Phase::Execute, "sh", &env, "B1", Path::new("/w"))
            .in_case(dir.path());

        assert_eq!(launch.cwd, dir.path());
        assert_eq!(launch.label, "thermal:execute");
        assert!(launch.to_string().starts_with("[thermal:execute] sh "));
    }

    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh").is_ok());
        assert!(matches!(
            find_executable("definitely-not-a-real-binary-name"),
            Err(WorkflowError::MissingExecutable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable_without_permission() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(matches!(
            find_executable(path.to_str().unwrap()),
            Err(WorkflowError::Permission(_))
        ));
    }
}
