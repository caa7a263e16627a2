//! Sync Engine
//!
//! For each selected step, every output case is assigned a layer and an
//! owning part, its values are extracted through the output format, and the
//! values are merged into the layer bundles. A region-only step contributes
//! to the middle layer of each region.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::artifact::{ArtifactError, ArtifactFormat, Locator, SyncMode, SyncValues};
use crate::error::{Result, WorkflowError};
use crate::sync::accumulator::{bundle_path, preview_path, LayerAccumulator};
use crate::sync::downsample::write_preview;
use crate::sync::{StepSyncReport, SyncOptions, SyncOutcome, SyncReport};
use crate::workflow::address::{AddressScheme, Case, HierarchyLevel};
use crate::workflow::configure::absolute;
use crate::workflow::hierarchy::{part_number, representative_layer, Build};
use crate::workflow::model::{Step, StepGraph};
use crate::workflow::parser::{load_document, load_document_workspace};

/// Name of the bundle folder inside the database directory.
pub const STORE_DIR: &str = "registered";

/// A case's output located in the layer store.
#[derive(Debug, Clone, PartialEq)]
struct LayerCase {
    part: u32,
    path: PathBuf,
}

/// Values extracted from one case.
struct Extraction {
    part: u32,
    x: Vec<f64>,
    y: Vec<f64>,
    values: SyncValues,
}

/// Merges step outputs into per-layer bundles.
///
/// # Example
///
/// ```rust,no_run
/// use layerflow::sync::{SyncEngine, SyncOptions};
///
/// let engine = SyncEngine::with_options("input.yaml", SyncOptions::default());
/// let report = engine.sync().unwrap();
/// println!("{} file(s) written", report.files_written());
/// ```
pub struct SyncEngine {
    input: PathBuf,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self::with_options(input, SyncOptions::default())
    }

    pub fn with_options(input: impl Into<PathBuf>, options: SyncOptions) -> Self {
        Self {
            input: input.into(),
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Restricts sync to the named steps.
    pub fn set_steps(&mut self, steps: Vec<String>) {
        self.options.steps = Some(steps).filter(|s| !s.is_empty());
    }

    fn selected(&self, name: &str) -> bool {
        self.options
            .steps
            .as_ref()
            .map_or(true, |steps| steps.iter().any(|s| s == name))
    }

    /// Syncs every selected step in workflow order.
    pub fn sync(&self) -> Result<SyncReport> {
        let input = absolute(&self.input)?;
        let names: Vec<String> = load_document(&input)?
            .step_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut report = SyncReport::default();
        for name in &names {
            if !self.selected(name) {
                info!("Skipping step '{}': not in the steps to sync", name);
                report
                    .steps
                    .push(StepSyncReport::new(name, SyncOutcome::Skipped));
                continue;
            }
            report.steps.push(self.sync_step(&input, name)?);
        }

        info!(
            "Synced {} step(s), {} file(s) written",
            report
                .steps
                .iter()
                .filter(|s| s.outcome == SyncOutcome::Synced)
                .count(),
            report.files_written()
        );
        Ok(report)
    }

    /// Directory holding the bundles of a build.
    pub fn store_dir(&self, workflow_dir: &Path, build: &Build) -> PathBuf {
        let root = match (&self.options.root, &build.path) {
            (Some(root), _) => root.clone(),
            (None, Some(path)) => workflow_dir.join(path),
            (None, None) => workflow_dir.join(&build.name),
        };
        root.join(STORE_DIR)
    }

    fn sync_step(&self, input: &Path, name: &str) -> Result<StepSyncReport> {
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

        info!("Syncing step '{}' ({})", step.name, step.class);

        let Some(format) = step.output else {
            info!("  > Step '{}' declares no output, nothing to sync", step.name);
            return Ok(StepSyncReport::new(name, SyncOutcome::Skipped));
        };
        if let Some(outcome) = eligibility(step, self.options.mode) {
            return Ok(StepSyncReport::new(name, outcome));
        }

        let scheme = AddressScheme::new(&root);
        let cases = step.output_cases(&scheme, build);
        let (layers, unplaced) = group_by_layer(step, build, &cases);

        let store = self.store_dir(&root, build);
        let mut report = StepSyncReport::new(name, SyncOutcome::Synced);
        report.cases_skipped = unplaced;
        let mut unsupported = 0;

        for (layer, layer_cases) in &layers {
            info!("  - layer: {}", layer);

            let mut extractions = Vec::new();
            for case in layer_cases {
                match self.extract(format, case) {
                    Ok(Some(extraction)) => extractions.push(extraction),
                    Ok(None) => report.cases_skipped += 1,
                    Err(ArtifactError::Unsupported { .. }) => {
                        info!("    No data to sync for {}", case.path.display());
                        unsupported += 1;
                    }
                    Err(e) => {
                        warn!("    Skipping {}: {}", case.path.display(), e);
                        report.cases_skipped += 1;
                    }
                }
            }
            report.cases_synced += extractions.len();

            let files = self.merge_layer(&store, &step.application, *layer, &extractions)?;
            report.files.extend(files);
        }

        if report.cases_synced == 0 && unsupported > 0 {
            report.outcome = SyncOutcome::Unsupported;
        }
        info!(
            "  > '{}': {} case(s) synced, {} skipped",
            step.name, report.cases_synced, report.cases_skipped
        );
        Ok(report)
    }

    /// Extracts a case's values. `None` when the file is missing or invalid.
    fn extract(
        &self,
        format: ArtifactFormat,
        case: &LayerCase,
    ) -> std::result::Result<Option<Extraction>, ArtifactError> {
        if !case.path.exists() {
            warn!("    Missing output {}", case.path.display());
            return Ok(None);
        }
        let artifact = format.open(&case.path);
        if !artifact.file_is_valid() {
            warn!("    Invalid output {}, not synced", case.path.display());
            return Ok(None);
        }

        let values = artifact.get_values_for_sync(self.options.mode)?;
        let Locator::Spatial { x, y } = &values.locator else {
            return Err(ArtifactError::Unsupported {
                format: format.tag().to_string(),
                mode: self.options.mode,
            });
        };
        Ok(Some(Extraction {
            part: case.part,
            x: x.clone(),
            y: y.clone(),
            values,
        }))
    }

    /// Merges a layer's extractions field by field. Returns the files written.
    fn merge_layer(
        &self,
        store: &Path,
        application: &str,
        layer: u32,
        extractions: &[Extraction],
    ) -> Result<Vec<PathBuf>> {
        let mut fields: IndexMap<&str, &str> = IndexMap::new();
        for extraction in extractions {
            for field in &extraction.values.fields {
                fields.entry(field.name.as_str()).or_insert(field.units.as_str());
            }
        }

        let mut written = Vec::new();
        for (field, units) in fields {
            let variable = variable_name(application, field);
            debug!("    - field: {}", variable);

            let path = bundle_path(store, &variable, layer);
            let mut acc = LayerAccumulator::load_or_new(&path, units, self.options.plate_size)?;
            for (part, points) in points_by_part(extractions, field) {
                acc.replace_part(part, &points.x, &points.y, &points.values)?;
            }
            acc.update_affine();
            acc.save(&path)?;

            let preview = preview_path(store, &variable, layer);
            write_preview(&preview, &acc, self.options.image_size, self.options.reduction)?;
            info!("    - output_file: {}", preview.display());

            written.push(path);
            written.push(preview);
        }
        Ok(written)
    }
}

/// Points of one part on one layer, gathered across cases.
#[derive(Debug, Default)]
struct PartPoints {
    x: Vec<f64>,
    y: Vec<f64>,
    values: Vec<f64>,
}

/// Concatenates a field's points per owning part, so a part with several
/// cases on the same layer (regions sharing a layer) replaces its previous
/// points once and keeps every case's contribution.
fn points_by_part(extractions: &[Extraction], field: &str) -> IndexMap<u32, PartPoints> {
    let mut parts: IndexMap<u32, PartPoints> = IndexMap::new();
    for extraction in extractions {
        let Some(values) = extraction.values.field(field) else {
            continue;
        };
        let points = parts.entry(extraction.part).or_default();
        points.x.extend_from_slice(&extraction.x);
        points.y.extend_from_slice(&extraction.y);
        points.values.extend_from_slice(&values.values);
    }
    parts
}

/// Name of the bundle folder of one synced field.
pub fn variable_name(application: &str, field: &str) -> String {
    format!("myna_{}_{}", application, field)
}

/// `Some(outcome)` when a step cannot be synced at all.
fn eligibility(step: &Step, mode: SyncMode) -> Option<SyncOutcome> {
    let types = &step.types;
    if !types.contains(HierarchyLevel::Layer) && !types.contains(HierarchyLevel::Region) {
        info!(
            "  > Step '{}' is not layer- or region-based, skipping sync",
            step.name
        );
        return Some(SyncOutcome::Ineligible);
    }
    if types.contains(HierarchyLevel::BuildRegion) {
        warn!(
            "  > Step '{}' iterates over build regions; part ownership is unknown, skipping sync",
            step.name
        );
        return Some(SyncOutcome::Unsupported);
    }
    if mode == SyncMode::Temporal {
        warn!("  > Temporal data has no layer bundle, skipping sync of '{}'", step.name);
        return Some(SyncOutcome::Unsupported);
    }
    None
}

/// Groups cases by the layer they contribute to. Returns the groups and the
/// number of cases that could not be placed.
fn group_by_layer(step: &Step, build: &Build, cases: &[Case]) -> (BTreeMap<u32, Vec<LayerCase>>, usize) {
    let mut layers: BTreeMap<u32, Vec<LayerCase>> = BTreeMap::new();
    let mut owners: HashMap<u32, &str> = HashMap::new();
    let mut unplaced = 0;

    for case in cases {
        let coordinate = &case.coordinate;
        let Some(part_name) = coordinate.part.as_deref() else {
            unplaced += 1;
            continue;
        };
        let Some(part) = part_number(part_name) else {
            warn!(
                "  > Part name '{}' has no number, skipping {}",
                part_name,
                case.path.display()
            );
            unplaced += 1;
            continue;
        };
        let owner = *owners.entry(part).or_insert(part_name);
        if owner != part_name {
            warn!(
                "  > Parts '{}' and '{}' share number {}, skipping {}",
                owner,
                part_name,
                part,
                case.path.display()
            );
            unplaced += 1;
            continue;
        }

        let layer = coordinate.layer.or_else(|| {
            coordinate
                .region
                .as_deref()
                .and_then(|region| build.region_layers(part_name, region))
                .and_then(representative_layer)
        });
        let Some(layer) = layer else {
            warn!(
                "  > No layer for {} in step '{}', skipping",
                coordinate, step.name
            );
            unplaced += 1;
            continue;
        };

        layers.entry(layer).or_default().push(LayerCase {
            part,
            path: case.path.clone(),
        });
    }
    (layers, unplaced)
}
