//! Layer Accumulators
//!
//! One bundle per (variable, layer) holds every part's points for that
//! layer. A part owns all of its points: merging a part's new values first
//! drops whatever the part contributed before, so re-running a single part
//! never duplicates data.
//!
//! Bundles are stored as gzip-compressed JSON at
//! `registered/<variable>/<layer:07>.json.gz` and replaced atomically.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::persist::write_atomic;

/// Largest encoded byte value.
const BYTE_MAX: f64 = u8::MAX as f64;

/// Path of a layer bundle inside the store.
pub fn bundle_path(store: &Path, variable: &str, layer: u32) -> PathBuf {
    store.join(variable).join(format!("{:07}.json.gz", layer))
}

/// Path of the preview image written beside a bundle.
pub fn preview_path(store: &Path, variable: &str, layer: u32) -> PathBuf {
    store.join(variable).join(format!("{:07}.pgm", layer))
}

/// Merged point cloud of one variable on one layer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LayerAccumulator {
    pub coords_x: Vec<f64>,
    pub coords_y: Vec<f64>,
    /// Owning part number of each point
    pub part_num: Vec<u32>,
    pub values: Vec<f64>,
    /// Slope of the value-to-byte map
    pub m: f64,
    /// Offset of the value-to-byte map
    pub b: f64,
    #[serde(default)]
    pub units: String,
    /// Edge length of the (square) build plate in meters
    #[serde(default)]
    pub plate_size: f64,
}

impl LayerAccumulator {
    pub fn new(units: impl Into<String>, plate_size: f64) -> Self {
        Self {
            units: units.into(),
            plate_size,
            ..Default::default()
        }
    }

    /// Loads a bundle, or starts an empty one when the file does not exist.
    pub fn load_or_new(path: &Path, units: &str, plate_size: f64) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(units, plate_size));
        }
        let mut acc = Self::load(path)?;
        acc.units = units.to_string();
        acc.plate_size = plate_size;
        Ok(acc)
    }

    /// Reads and checks a bundle.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| WorkflowError::io(path, e))?;
        let acc: Self = serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?;
        acc.check()
            .map_err(|msg| WorkflowError::Accumulator(format!("{}: {}", path.display(), msg)))?;
        Ok(acc)
    }

    /// Compresses the bundle and writes it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serde_json::to_vec(self)?)
            .map_err(|e| WorkflowError::io(path, e))?;
        let content = encoder.finish().map_err(|e| WorkflowError::io(path, e))?;
        write_atomic(path, &content)
    }

    fn check(&self) -> std::result::Result<(), String> {
        let n = self.values.len();
        if self.coords_x.len() != n || self.coords_y.len() != n || self.part_num.len() != n {
            return Err(format!(
                "array lengths differ (x: {}, y: {}, part_num: {}, values: {})",
                self.coords_x.len(),
                self.coords_y.len(),
                self.part_num.len(),
                n
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Part numbers present, sorted.
    pub fn parts(&self) -> Vec<u32> {
        let mut parts = self.part_num.clone();
        parts.sort_unstable();
        parts.dedup();
        parts
    }

    /// Replaces every point owned by `part` with the given points.
    ///
    /// Points with a non-finite coordinate or value are dropped. Returns the
    /// number of points kept.
    pub fn replace_part(&mut self, part: u32, x: &[f64], y: &[f64], values: &[f64]) -> Result<usize> {
        if x.len() != values.len() || y.len() != values.len() {
            return Err(WorkflowError::Accumulator(format!(
                "part {} has {} x, {} y and {} values",
                part,
                x.len(),
                y.len(),
                values.len()
            )));
        }

        let keep: Vec<bool> = self.part_num.iter().map(|p| *p != part).collect();
        let removed = keep.iter().filter(|k| !**k).count();
        self.coords_x = retain(&self.coords_x, &keep);
        self.coords_y = retain(&self.coords_y, &keep);
        self.values = retain(&self.values, &keep);
        self.part_num.retain(|p| *p != part);

        let mut added = 0;
        for ((x, y), v) in x.iter().zip(y).zip(values) {
            if !(x.is_finite() && y.is_finite() && v.is_finite()) {
                continue;
            }
            self.coords_x.push(*x);
            self.coords_y.push(*y);
            self.values.push(*v);
            self.part_num.push(part);
            added += 1;
        }

        debug!("Part {}: replaced {} point(s) with {}", part, removed, added);
        Ok(added)
    }

    /// Recomputes `(m, b)` so the value range maps onto `0..=255`.
    pub fn update_affine(&mut self) {
        let (min, max) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if min.is_finite() && max.is_finite() {
            self.m = (max - min) / BYTE_MAX;
            self.b = min;
        } else {
            self.m = 0.0;
            self.b = 0.0;
        }
    }

    /// Encodes a value to a byte with the bundle's map.
    pub fn encode(&self, value: f64) -> u8 {
        if self.m == 0.0 || !value.is_finite() {
            return 0;
        }
        ((value - self.b) / self.m).round().clamp(0.0, BYTE_MAX) as u8
    }

    /// Decodes a byte back to an approximate value.
    pub fn decode(&self, byte: u8) -> f64 {
        self.m * f64::from(byte) + self.b
    }
}

fn retain(values: &[f64], keep: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| *v)
        .collect()
}
