//! Case Context
//!
//! Each case directory receives a small YAML file holding the part of the
//! build hierarchy that case is about, plus the identity of the step that
//! owns it. Collaborator scripts read this file; the engine only writes it.
//!
//! Step identity is also handed to collaborator processes through
//! environment variables. That channel exists only at the process boundary:
//! inside the crate the same information travels as a [`StepEnvironment`]
//! value.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};

use crate::error::{Result, WorkflowError};
use crate::persist::write_atomic;
use crate::workflow::address::{Coordinate, HierarchyLevel, TypeList};
use crate::workflow::hierarchy::{Build, LayerData};
use crate::workflow::model::Step;

/// File name of the context document inside every case directory.
pub const CONTEXT_FILE_NAME: &str = "myna_data.yaml";

/// Who owns a case directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepIdentity {
    pub name: String,
    pub class: String,
    pub application: String,
    pub index: usize,
}

impl From<&Step> for StepIdentity {
    fn from(step: &Step) -> Self {
        Self {
            name: step.name.clone(),
            class: step.class.clone(),
            application: step.application.clone(),
            index: step.index,
        }
    }
}

/// Run metadata stored alongside the scoped build.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ContextMeta {
    #[serde(default)]
    pub step: StepIdentity,

    /// Workflow document that configured this case
    #[serde(default)]
    pub input: PathBuf,

    /// SHA-256 of the context with this field unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// The per-case context document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CaseContext {
    pub build: Build,
    #[serde(default)]
    pub myna: ContextMeta,
}

/// What [`CaseContext::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Unchanged,
    Regenerated,
}

impl WriteOutcome {
    pub fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl CaseContext {
    /// Builds the context of one case, scoped to its coordinate.
    pub fn new(build: &Build, coordinate: &Coordinate, types: &TypeList, step: &Step, input: &Path) -> Self {
        Self {
            build: scope_build(build, coordinate, types),
            myna: ContextMeta {
                step: StepIdentity::from(step),
                input: input.to_path_buf(),
                fingerprint: None,
            },
        }
    }

    /// SHA-256 over the canonical JSON form, ignoring any stored
    /// fingerprint.
    pub fn compute_fingerprint(&self) -> Result<String> {
        let mut body = self.clone();
        body.myna.fingerprint = None;
        let canonical = serde_json::to_vec(&body)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }

    /// Returns a copy carrying its own fingerprint.
    pub fn fingerprinted(mut self) -> Result<Self> {
        self.myna.fingerprint = Some(self.compute_fingerprint()?);
        Ok(self)
    }

    /// Loads a context file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Writes the context into `case_dir` unless an equivalent file is
    /// already there.
    ///
    /// Existing files are compared by fingerprint and rewritten on
    /// mismatch. Files written before fingerprints existed are compared
    /// document-wise; that path is deprecated and logged as such.
    pub fn write(&self, case_dir: &Path, overwrite: bool) -> Result<WriteOutcome> {
        let path = case_dir.join(CONTEXT_FILE_NAME);
        let current = self.clone().fingerprinted()?;

        let outcome = if !path.exists() {
            WriteOutcome::Created
        } else if overwrite {
            WriteOutcome::Regenerated
        } else {
            match CaseContext::load(&path) {
                Ok(existing) => match &existing.myna.fingerprint {
                    Some(stored) if Some(stored) == current.myna.fingerprint.as_ref() => {
                        WriteOutcome::Unchanged
                    }
                    Some(_) => {
                        debug!("Context fingerprint changed for {}", path.display());
                        WriteOutcome::Regenerated
                    }
                    None => {
                        warn!(
                            "{} has no fingerprint; using deprecated document comparison",
                            path.display()
                        );
                        if existing.build == self.build && existing.myna.step == self.myna.step {
                            WriteOutcome::Unchanged
                        } else {
                            WriteOutcome::Regenerated
                        }
                    }
                },
                Err(e) => {
                    warn!("Replacing unreadable context {}: {}", path.display(), e);
                    WriteOutcome::Regenerated
                }
            }
        };

        if outcome.wrote() {
            let yaml = serde_yaml::to_string(&current)?;
            write_atomic(&path, yaml.as_bytes())?;
            debug!("{:?} {}", outcome, path.display());
        }
        Ok(outcome)
    }
}

/// Removes every part, region, build region and layer entry that does not
/// belong to the coordinate.
pub fn scope_build(build: &Build, coordinate: &Coordinate, types: &TypeList) -> Build {
    let mut scoped = build.clone();
    let layer = coordinate.layer.filter(|_| types.contains(HierarchyLevel::Layer));

    if let Some(name) = &coordinate.build_region {
        scoped.parts.clear();
        scoped.build_regions.retain(|key, _| key == name);
        if let Some(layer) = layer {
            for region in scoped.build_regions.values_mut() {
                region.layerlist = vec![layer];
                for part in region.parts.values_mut() {
                    retain_layer(&mut part.layer_data, layer);
                }
            }
        }
    } else if let Some(part_name) = &coordinate.part {
        scoped.build_regions.clear();
        scoped.parts.retain(|key, _| key == part_name);
        for part in scoped.parts.values_mut() {
            match (&coordinate.region, part.regions.as_mut()) {
                (Some(region_name), Some(regions)) => {
                    regions.retain(|key, _| key == region_name);
                    if let Some(layer) = layer {
                        for region in regions.values_mut() {
                            region.layers = vec![layer];
                            retain_layer(&mut region.layer_data, layer);
                        }
                    }
                }
                _ => {
                    if let Some(layer) = layer {
                        part.layers = vec![layer];
                        retain_layer(&mut part.layer_data, layer);
                    }
                }
            }
        }
    } else if let Some(layer) = layer {
        for part in scoped.parts.values_mut() {
            retain_layer(&mut part.layer_data, layer);
        }
    }

    scoped
}

/// Keeps only the entry of one layer. Keys may be integers or strings.
fn retain_layer(data: &mut LayerData, layer: u32) {
    let wanted = layer.to_string();
    data.retain(|key, _| match key {
        Value::Number(n) => n.as_u64() == Some(u64::from(layer)),
        Value::String(s) => s.trim() == wanted,
        _ => false,
    });
}

/// Environment variable names understood by collaborator scripts.
pub mod env {
    pub const INPUT: &str = "MYNA_INPUT";
    pub const STEP_NAME: &str = "MYNA_STEP_NAME";
    pub const STEP_CLASS: &str = "MYNA_STEP_CLASS";
    pub const STEP_INDEX: &str = "MYNA_STEP_INDEX";
    pub const LAST_STEP_NAME: &str = "MYNA_LAST_STEP_NAME";
    pub const LAST_STEP_CLASS: &str = "MYNA_LAST_STEP_CLASS";
    pub const APP_PATH: &str = "MYNA_APP_PATH";
}

/// Step identity passed to collaborator processes.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEnvironment {
    /// Absolute path of the workflow document
    pub input: PathBuf,
    pub step_name: String,
    pub step_class: String,
    pub step_index: usize,
    pub last_step_name: Option<String>,
    pub last_step_class: Option<String>,
    pub app_path: PathBuf,
}

impl StepEnvironment {
    pub fn new(input: &Path, step: &Step, previous: Option<&Step>, app_path: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            step_name: step.name.clone(),
            step_class: step.class.clone(),
            step_index: step.index,
            last_step_name: previous.map(|p| p.name.clone()),
            last_step_class: previous.map(|p| p.class.clone()),
            app_path: app_path.to_path_buf(),
        }
    }

    /// Variables to set on a child process. Predecessor variables are set
    /// to an empty string for the first step.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (env::INPUT, self.input.display().to_string()),
            (env::STEP_NAME, self.step_name.clone()),
            (env::STEP_CLASS, self.step_class.clone()),
            (env::STEP_INDEX, self.step_index.to_string()),
            (env::LAST_STEP_NAME, self.last_step_name.clone().unwrap_or_default()),
            (env::LAST_STEP_CLASS, self.last_step_class.clone().unwrap_or_default()),
            (env::APP_PATH, self.app_path.display().to_string()),
        ]
    }
}

/// Writes the context files of every case of a step. Returns the number of
/// files written.
pub fn write_step_contexts(
    step: &Step,
    cases: &[(Coordinate, PathBuf)],
    build: &Build,
    input: &Path,
    overwrite: bool,
) -> Result<usize> {
    let mut written = 0;
    for (coordinate, dir) in cases {
        fs::create_dir_all(dir).map_err(|e| WorkflowError::io(dir, e))?;
        let context = CaseContext::new(build, coordinate, &step.types, step, input);
        if context.write(dir, overwrite)?.wrote() {
            written += 1;
        }
    }
    if written > 0 {
        info!("  > Wrote {} case context file(s) for step '{}'", written, step.name);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::address::AddressScheme;
    use crate::workflow::parser::StepSettings;
    use tempfile::tempdir;

    fn step(class: &str, types: Option<Vec<HierarchyLevel>>) -> Step {
        let settings = StepSettings {
            class: class.to_string(),
            application: "app".to_string(),
            types,
            ..Default::default()
        };
        Step::from_settings("s", 0, &settings, None).unwrap()
    }

    fn build() -> Build {
        let mut build = Build::new("B1")
            .with_part("P1", &[1, 2])
            .with_part("P2", &[1, 2])
            .with_region("P1", "R1", &[1, 2])
            .with_region("P1", "R2", &[2]);
        let part = &mut build.parts["P1"];
        part.layer_data.insert(Value::from(1), Value::from("first"));
        part.layer_data.insert(Value::from("2"), Value::from("second"));
        build
    }

    fn coordinate(part: &str, region: Option<&str>, layer: Option<u32>) -> Coordinate {
        Coordinate {
            part: Some(part.to_string()),
            region: region.map(str::to_string),
            layer,
            ..Coordinate::build("B1")
        }
    }

    #[test]
    fn test_scope_part_layer() {
        let types = TypeList::new(&[HierarchyLevel::Part, HierarchyLevel::Layer]).unwrap();
        let scoped = scope_build(&build(), &coordinate("P1", None, Some(2)), &types);

        assert_eq!(scoped.parts.len(), 1);
        let part = &scoped.parts["P1"];
        assert_eq!(part.layers, vec![2]);
        assert_eq!(part.layer_data.len(), 1);
        assert_eq!(part.layer_data.get(Value::from("2")), Some(&Value::from("second")));
    }

    #[test]
    fn test_scope_region() {
        let types = TypeList::new(&[HierarchyLevel::Part, HierarchyLevel::Region]).unwrap();
        let scoped = scope_build(&build(), &coordinate("P1", Some("R2"), None), &types);

        let regions = scoped.parts["P1"].regions.as_ref().unwrap();
        assert_eq!(regions.keys().collect::<Vec<_>>(), vec!["R2"]);
    }

    #[test]
    fn test_scope_build_region() {
        let build = build().with_build_region("BR1", &["P1"], &[1, 2]).with_build_region("BR2", &["P2"], &[1]);
        let types = TypeList::new(&[HierarchyLevel::BuildRegion, HierarchyLevel::Layer]).unwrap();
        let coord = Coordinate {
            build_region: Some("BR1".to_string()),
            layer: Some(2),
            ..Coordinate::build("B1")
        };
        let scoped = scope_build(&build, &coord, &types);

        assert!(scoped.parts.is_empty());
        assert_eq!(scoped.build_regions.len(), 1);
        assert_eq!(scoped.build_regions["BR1"].layerlist, vec![2]);
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempdir().unwrap();
        let step = step("solidification_part", None);
        let context = CaseContext::new(
            &build(),
            &coordinate("P1", None, Some(1)),
            &step.types,
            &step,
            Path::new("/w/input.yaml"),
        );

        assert_eq!(context.write(dir.path(), false).unwrap(), WriteOutcome::Created);
        let path = dir.path().join(CONTEXT_FILE_NAME);
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(context.write(dir.path(), false).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);

        assert_eq!(context.write(dir.path(), true).unwrap(), WriteOutcome::Regenerated);
    }

    #[test]
    fn test_fingerprint_mismatch_regenerates() {
        let dir = tempdir().unwrap();
        let step = step("solidification_part", None);
        let types = step.types.clone();
        let first = CaseContext::new(&build(), &coordinate("P1", None, Some(1)), &types, &step, Path::new("/w/in.yaml"));
        first.write(dir.path(), false).unwrap();

        let changed_build = build().with_part("P1", &[1, 2, 3]);
        let second = CaseContext::new(&changed_build, &coordinate("P1", None, Some(1)), &types, &step, Path::new("/w/in.yaml"));
        assert_eq!(second.write(dir.path(), false).unwrap(), WriteOutcome::Regenerated);

        let stored = CaseContext::load(&dir.path().join(CONTEXT_FILE_NAME)).unwrap();
        assert_eq!(stored.myna.fingerprint, Some(second.compute_fingerprint().unwrap()));
    }

    #[test]
    fn test_legacy_context_without_fingerprint() {
        let dir = tempdir().unwrap();
        let step = step("solidification_part", None);
        let context = CaseContext::new(&build(), &coordinate("P1", None, Some(1)), &step.types, &step, Path::new("/w/in.yaml"));

        // Equal legacy document is left alone
        let legacy = serde_yaml::to_string(&context).unwrap();
        fs::write(dir.path().join(CONTEXT_FILE_NAME), &legacy).unwrap();
        assert_eq!(context.write(dir.path(), false).unwrap(), WriteOutcome::Unchanged);

        // A different legacy document is regenerated
        let mut other = context.clone();
        other.myna.step.index = 7;
        fs::write(dir.path().join(CONTEXT_FILE_NAME), serde_yaml::to_string(&other).unwrap()).unwrap();
        assert_eq!(context.write(dir.path(), false).unwrap(), WriteOutcome::Regenerated);
    }

    #[test]
    fn test_write_step_contexts_counts_writes() {
        let dir = tempdir().unwrap();
        let step = step("solidification_part", None);
        let build = build();
        let scheme = AddressScheme::new(dir.path());
        let cases: Vec<(Coordinate, PathBuf)> = step
            .output_cases(&scheme, &build)
            .into_iter()
            .map(|c| (c.coordinate, c.dir))
            .collect();
        assert_eq!(cases.len(), 4);

        let input = dir.path().join("input.yaml");
        assert_eq!(write_step_contexts(&step, &cases, &build, &input, false).unwrap(), 4);
        assert_eq!(write_step_contexts(&step, &cases, &build, &input, false).unwrap(), 0);
    }

    #[test]
    fn test_step_environment_vars() {
        let first = step("solidification_part", None);
        let mut second = step("microstructure_part", None);
        second.name = "micro".to_string();
        second.index = 1;

        let env = StepEnvironment::new(Path::new("/w/in.yaml"), &second, Some(&first), Path::new("/apps"));
        let vars = env.vars();
        assert!(vars.contains(&(env::STEP_NAME, "micro".to_string())));
        assert!(vars.contains(&(env::STEP_INDEX, "1".to_string())));
        assert!(vars.contains(&(env::LAST_STEP_NAME, "s".to_string())));
        assert!(vars.contains(&(env::LAST_STEP_CLASS, "solidification_part".to_string())));

        let env = StepEnvironment::new(Path::new("/w/in.yaml"), &first, None, Path::new("/apps"));
        assert!(env.vars().contains(&(env::LAST_STEP_NAME, String::new())));
    }
}
