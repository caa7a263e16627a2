//! Result Sync
//!
//! Gathers the outputs of every case of a step back into one accumulator
//! bundle per (variable, layer), with an 8-bit preview image beside each
//! bundle.
//!
//! # Architecture
//!
//! - [`accumulator`]: per-layer bundles and their value-to-byte map
//! - [`downsample`]: rasterizing bundles into previews
//! - [`merge`]: the sync engine walking steps and cases

pub mod accumulator;
pub mod downsample;
pub mod merge;

use std::path::PathBuf;

use crate::artifact::SyncMode;

pub use accumulator::LayerAccumulator;
pub use downsample::{downsample_to_image, Image, Reduction};
pub use merge::SyncEngine;

/// Default preview edge length in pixels.
pub const DEFAULT_IMAGE_SIZE: usize = 1024;
/// Default build plate edge length in meters.
pub const DEFAULT_PLATE_SIZE: f64 = 0.25;

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Database directory; bundles go under its `registered` folder.
    /// Defaults to the build `path`, else `<workflow dir>/<build>`.
    pub root: Option<PathBuf>,
    pub image_size: usize,
    pub plate_size: f64,
    pub reduction: Reduction,
    pub mode: SyncMode,
    /// Steps to sync; all when `None`
    pub steps: Option<Vec<String>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root: None,
            image_size: DEFAULT_IMAGE_SIZE,
            plate_size: DEFAULT_PLATE_SIZE,
            reduction: Reduction::Average,
            mode: SyncMode::Spatial2d,
            steps: None,
        }
    }
}

/// Why a step was or was not synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Bundles were written
    Synced,
    /// The step iterates over neither layers nor regions
    Ineligible,
    /// The output format or hierarchy level has no extraction for this mode
    Unsupported,
    /// Not selected, or no output declared
    Skipped,
}

/// What sync did for one step.
#[derive(Debug, Clone)]
pub struct StepSyncReport {
    pub name: String,
    pub outcome: SyncOutcome,
    /// Cases whose values were merged
    pub cases_synced: usize,
    /// Cases left out (missing, invalid or unreadable)
    pub cases_skipped: usize,
    /// Bundles and previews written
    pub files: Vec<PathBuf>,
}

impl StepSyncReport {
    fn new(name: &str, outcome: SyncOutcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            cases_synced: 0,
            cases_skipped: 0,
            files: Vec::new(),
        }
    }
}

/// Result of a sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub steps: Vec<StepSyncReport>,
}

impl SyncReport {
    pub fn files_written(&self) -> usize {
        self.steps.iter().map(|s| s.files.len()).sum()
    }
}
