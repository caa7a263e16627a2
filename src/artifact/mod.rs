//! Step Artifacts
//!
//! Every step declares the file format it consumes and produces. A format
//! knows how to decide whether a file on disk is a complete, valid output
//! and how to extract values for syncing back into the build database.
//!
//! # Structure
//!
//! - [`formats`]: the format-tag registry and per-format column layouts
//! - [`csv`]: header-checked CSV reader shared by tabular formats

pub mod csv;
pub mod formats;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use formats::ArtifactFormat;

/// How extracted values are located in space or time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Per-point values on the XY plane
    #[serde(rename = "spatial_2d")]
    Spatial2d,
    /// Volumetric data reduced to its top (maximum Z) slice
    #[serde(rename = "spatial_3d")]
    Spatial3d,
    /// Time series
    #[serde(rename = "temporal")]
    Temporal,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spatial2d => "spatial_2d",
            Self::Spatial3d => "spatial_3d",
            Self::Temporal => "temporal",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spatial_2d" | "spatial" => Ok(Self::Spatial2d),
            "spatial_3d" => Ok(Self::Spatial3d),
            "temporal" | "transient" => Ok(Self::Temporal),
            other => Err(format!("unknown sync mode '{}'", other)),
        }
    }
}

/// A named column a format carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    pub name: &'static str,
    pub units: Option<&'static str>,
    pub description: &'static str,
}

impl Variable {
    /// Lower-cased CSV header: `"x (m)"`, or just the name when unitless.
    pub fn header(&self) -> String {
        match self.units {
            Some(units) => format!("{} ({})", self.name, units).to_lowercase(),
            None => self.name.to_lowercase(),
        }
    }
}

/// Where extracted values sit.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Spatial { x: Vec<f64>, y: Vec<f64> },
    Temporal { time: Vec<f64> },
}

impl Locator {
    pub fn len(&self) -> usize {
        match self {
            Self::Spatial { x, .. } => x.len(),
            Self::Temporal { time } => time.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One extracted field: a value per locator entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncField {
    pub name: String,
    pub units: String,
    pub values: Vec<f64>,
}

/// Values extracted from an artifact for syncing.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncValues {
    pub locator: Locator,
    pub fields: Vec<SyncField>,
}

impl SyncValues {
    pub fn field(&self, name: &str) -> Option<&SyncField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Errors raised while reading an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The format has no extraction for this mode. Sync treats this as
    /// a skip, not a failure.
    #[error("{mode} sync is not implemented for format '{format}'")]
    Unsupported { format: String, mode: SyncMode },

    #[error("'{}' has no column '{column}'", path.display())]
    MissingColumn { path: PathBuf, column: String },
}

/// Capability interface of a step output file.
pub trait Artifact {
    /// Path of the underlying file.
    fn path(&self) -> &Path;

    /// Registered format of this artifact.
    fn format(&self) -> ArtifactFormat;

    /// True when the file exists, has the format's extension and carries
    /// every required column. Depends only on file contents.
    fn file_is_valid(&self) -> bool;

    /// Extracts locator and field arrays for syncing.
    fn get_values_for_sync(&self, mode: SyncMode) -> Result<SyncValues, ArtifactError>;
}
