//! LayerFlow CLI Entry Point
//!
//! Provides the `config`, `run` and `sync` commands.
//!
//! # Usage
//!
//! ```bash
//! # Create case directories and context files
//! layerflow config --input input.yaml
//!
//! # Run two steps, relaunching cases with valid outputs
//! layerflow run --input input.yaml --step [thermal,solidification] --overwrite
//!
//! # Preview launches only
//! layerflow run --dry-run
//!
//! # Merge results into the build database
//! layerflow sync --step thermal --image-size 512 --reduction max
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use layerflow::artifact::SyncMode;
use layerflow::execution::{Runner, StepState};
use layerflow::sync::{Reduction, SyncEngine, SyncOptions, SyncOutcome};
use layerflow::workflow::configure::{configure, ConfigureOptions};
use layerflow::workflow::CaseStatus;
use layerflow::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_INPUT: &str = "input.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Config,
    Run,
    Sync,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    input: PathBuf,
    output: Option<PathBuf>,
    steps: Vec<String>,
    overwrite: bool,
    app_path: Option<PathBuf>,
    interpreter: Option<String>,
    dry_run: bool,
    sync: SyncOptions,
    verbose: bool,
}

impl Config {
    fn new(command: Command) -> Self {
        Self {
            command,
            input: PathBuf::from(DEFAULT_INPUT),
            output: None,
            steps: Vec::new(),
            overwrite: false,
            app_path: None,
            interpreter: None,
            dry_run: false,
            sync: SyncOptions::default(),
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Additive Manufacturing Workflow Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: layerflow <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  config              Create case directories and context files");
    println!("  run                 Launch the scripts of each step");
    println!("  sync                Merge step outputs into per-layer bundles");
    println!();
    println!("Options:");
    println!("  --input PATH        Workflow file (default: {})", DEFAULT_INPUT);
    println!("  --output PATH       Where config saves the workflow (default: --input)");
    println!("  --step NAMES        Steps to run or sync, e.g. thermal or [a,b]");
    println!("  --overwrite         Regenerate files and relaunch valid cases");
    println!("  --app-path PATH     Root of the application scripts");
    println!("  --interpreter NAME  Interpreter for phase scripts (default: python)");
    println!("  --dry-run           Print launches without running them");
    println!("  --database PATH     Database directory for sync");
    println!("  --image-size N      Preview size in pixels (default: 1024)");
    println!("  --plate-size M      Build plate size in meters (default: 0.25)");
    println!("  --reduction R       max, min or average (default: average)");
    println!("  --mode M            spatial_2d, spatial_3d or temporal (default: spatial_2d)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  layerflow config --input input.yaml");
    println!("  layerflow run --step [thermal,solidification]");
    println!("  layerflow sync --step thermal --reduction max");
}

/// Splits `a`, `a,b` or `[a, b]` into step names.
fn parse_step_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let command = match args.get(1).map(String::as_str) {
        Some("--help" | "-h") | None => {
            print_usage();
            std::process::exit(0);
        }
        Some("--version" | "-V") => {
            println!("{} {}", APP_NAME, VERSION);
            std::process::exit(0);
        }
        Some("config") => Command::Config,
        Some("run") => Command::Run,
        Some("sync") => Command::Sync,
        Some(other) => return Err(format!("Unknown command: {}", other)),
    };

    let mut config = Config::new(command);
    let mut i = 2; // Skip program name and command

    while i < args.len() {
        let arg = args[i].as_str();

        let mut value = |name: &str| -> Result<String, String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} requires a value", name))
        };

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--overwrite" => config.overwrite = true,
            "--dry-run" => config.dry_run = true,
            "--verbose" | "-v" => config.verbose = true,
            "--input" => config.input = PathBuf::from(value(arg)?),
            "--output" => config.output = Some(PathBuf::from(value(arg)?)),
            "--step" => config.steps.extend(parse_step_list(&value(arg)?)),
            "--app-path" => config.app_path = Some(PathBuf::from(value(arg)?)),
            "--interpreter" => config.interpreter = Some(value(arg)?),
            "--database" => config.sync.root = Some(PathBuf::from(value(arg)?)),
            "--image-size" => {
                let v = value(arg)?;
                config.sync.image_size = v
                    .parse()
                    .map_err(|_| format!("Invalid image size: {}", v))?;
            }
            "--plate-size" => {
                let v = value(arg)?;
                config.sync.plate_size = v
                    .parse()
                    .map_err(|_| format!("Invalid plate size: {}", v))?;
            }
            "--reduction" => config.sync.reduction = value(arg)?.parse::<Reduction>()?,
            "--mode" => config.sync.mode = value(arg)?.parse::<SyncMode>()?,
            other => return Err(format!("Unknown option: {}", other)),
        }
        i += 1;
    }

    Ok(config)
}

fn status_label(status: CaseStatus) -> colored::ColoredString {
    match status {
        CaseStatus::Valid => "valid".green(),
        CaseStatus::Invalid => "invalid".red(),
        CaseStatus::Missing => "missing".yellow(),
        CaseStatus::Unchecked => "unchecked".normal(),
    }
}

fn run_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let options = ConfigureOptions {
        output: config.output.clone(),
        overwrite: config.overwrite,
    };
    let report = configure(&config.input, &options)?;

    println!();
    for step in &report.steps {
        println!(
            "{} {} case(s), {} context file(s) written",
            step.name.as_str().bold(),
            step.cases,
            step.contexts_written
        );
        for (path, status) in &step.outputs {
            println!("    {} ({})", path.display(), status_label(*status));
        }
    }
    for warning in &report.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
    Ok(())
}

fn run_steps(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut runner = Runner::new(&config.input);
    if let Some(path) = &config.app_path {
        runner.set_app_path(path);
    }
    if let Some(interpreter) = &config.interpreter {
        runner.set_interpreter(interpreter.as_str());
    }
    runner.set_steps(config.steps.clone());
    runner.set_overwrite(config.overwrite);
    runner.set_dry_run(config.dry_run);

    if config.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        println!();
    }

    let report = runner.run()?;

    println!("{}", report.timeline.gantt_chart());
    for step in &report.steps {
        let state = match step.state {
            StepState::Valid => "valid".green(),
            StepState::Invalid => "invalid".red(),
            other => format!("{:?}", other).to_lowercase().as_str().normal(),
        };
        println!(
            "{}: {} ({} launched, {} skipped)",
            step.name.as_str().bold(),
            state,
            step.launched,
            step.skipped_cases
        );
        for line in &step.planned {
            println!("    {}", line);
        }
    }

    if !report.all_valid() {
        warn!("Some step outputs are not valid; re-run to regenerate them");
    }
    Ok(())
}

fn run_sync(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = SyncEngine::with_options(&config.input, config.sync.clone());
    engine.set_steps(config.steps.clone());
    let report = engine.sync()?;

    println!();
    for step in &report.steps {
        let outcome = match step.outcome {
            SyncOutcome::Synced => "synced".green(),
            SyncOutcome::Ineligible => "not layer-based".yellow(),
            SyncOutcome::Unsupported => "unsupported".yellow(),
            SyncOutcome::Skipped => "skipped".normal(),
        };
        println!(
            "{}: {} ({} case(s), {} file(s))",
            step.name.as_str().bold(),
            outcome,
            step.cases_synced,
            step.files.len()
        );
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    info!("Workflow: {}", config.input.display());
    let result = match config.command {
        Command::Config => run_config(&config),
        Command::Run => run_steps(&config),
        Command::Sync => run_sync(&config),
    };
    if let Err(e) = &result {
        error!("{:?} failed: {}", config.command, e);
    }
    result
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_step_list_forms() {
        assert_eq!(parse_step_list("thermal"), vec!["thermal"]);
        assert_eq!(parse_step_list("[a, b]"), vec!["a", "b"]);
        assert_eq!(parse_step_list("a,b,"), vec!["a", "b"]);
        assert!(parse_step_list("[]").is_empty());
    }

    #[test]
    fn test_parse_sync_arguments() {
        let config = parse_arguments(&args(&[
            "layerflow",
            "sync",
            "--input",
            "w/input.yaml",
            "--step",
            "[a,b]",
            "--step",
            "c",
            "--image-size",
            "256",
            "--reduction",
            "max",
        ]))
        .unwrap();

        assert_eq!(config.command, Command::Sync);
        assert_eq!(config.input, PathBuf::from("w/input.yaml"));
        assert_eq!(config.steps, vec!["a", "b", "c"]);
        assert_eq!(config.sync.image_size, 256);
        assert_eq!(config.sync.reduction, Reduction::Max);
    }

    #[test]
    fn test_parse_arguments_errors() {
        assert!(parse_arguments(&args(&["layerflow", "deploy"])).is_err());
        assert!(parse_arguments(&args(&["layerflow", "run", "--input"])).is_err());
        assert!(parse_arguments(&args(&["layerflow", "run", "--bogus"])).is_err());
        assert!(parse_arguments(&args(&["layerflow", "sync", "--mode", "volumetric"])).is_err());
    }
}
