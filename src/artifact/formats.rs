//! Artifact Format Registry
//!
//! Maps format tags (`gv`, `reduced_solidification`, ...) to their file
//! layout. Tabular formats list the columns a valid file must carry and
//! which columns feed each synced field; opaque formats (VTK, Exodus) are
//! validated by extension only and cannot be synced.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::csv::CsvArtifact;
use super::{Artifact, ArtifactError, SyncMode, SyncValues, Variable};

/// Registered artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Temperature,
    Gv,
    ReducedSolidification,
    MeltPoolGeometry,
    DepthMap,
    Id,
    Region,
    GrainSlice,
    CreepTimeseries,
    Vtk,
    Exodus,
}

/// How a synced field is computed from file columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldSource {
    Column(&'static str),
    /// Element-wise product of two columns
    Product(&'static str, &'static str),
}

/// A field extracted for sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub units: &'static str,
    pub source: FieldSource,
}

/// Column layout used for spatial extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialLayout {
    pub x: &'static str,
    pub y: &'static str,
    /// Height column; when present only the top slice is kept
    pub z: Option<&'static str>,
    pub fields: &'static [FieldSpec],
    /// Drop rows with any missing value
    pub drop_incomplete: bool,
}

/// Column layout used for temporal extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalLayout {
    pub time: &'static str,
    pub fields: &'static [FieldSpec],
}

/// Static description of a format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatSpec {
    pub tag: &'static str,
    /// Class name accepted for compatibility with older workflow files
    pub legacy_name: &'static str,
    /// Expected extension, including the dot
    pub extension: &'static str,
    /// Columns a valid file must carry. Empty for opaque formats.
    pub variables: &'static [Variable],
    pub tabular: bool,
    pub spatial: Option<SpatialLayout>,
    pub temporal: Option<TemporalLayout>,
}

impl FormatSpec {
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e) == self.extension)
            .unwrap_or(false)
    }

    pub fn required_headers(&self) -> Vec<String> {
        self.variables.iter().map(Variable::header).collect()
    }
}

const fn var(name: &'static str, units: Option<&'static str>, description: &'static str) -> Variable {
    Variable {
        name,
        units,
        description,
    }
}

const X: Variable = var("x", Some("m"), "spatial location in x-axis");
const Y: Variable = var("y", Some("m"), "spatial location in y-axis");

const TEMPERATURE_SPATIAL_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "T",
    units: "K",
    source: FieldSource::Column("t (k)"),
}];

const GV_SPATIAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "G",
        units: "K/m",
        source: FieldSource::Column("g (k/m)"),
    },
    FieldSpec {
        name: "R",
        units: "m/s",
        source: FieldSource::Column("v (m/s)"),
    },
    FieldSpec {
        name: "cooling_rate",
        units: "K/s",
        source: FieldSource::Product("g (k/m)", "v (m/s)"),
    },
];

const REDUCED_SOLIDIFICATION_SPATIAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "t_melt",
        units: "s",
        source: FieldSource::Column("tm"),
    },
    FieldSpec {
        name: "t_solidify",
        units: "s",
        source: FieldSource::Column("ts"),
    },
    FieldSpec {
        name: "cooling_rate",
        units: "K/s",
        source: FieldSource::Column("cr"),
    },
];

const MELT_POOL_GEOMETRY_SPATIAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "time",
        units: "s",
        source: FieldSource::Column("time (s)"),
    },
    FieldSpec {
        name: "length",
        units: "m",
        source: FieldSource::Column("length (m)"),
    },
    FieldSpec {
        name: "width",
        units: "m",
        source: FieldSource::Column("width (m)"),
    },
    FieldSpec {
        name: "depth",
        units: "m",
        source: FieldSource::Column("depth (m)"),
    },
];

const DEPTH_MAP_SPATIAL_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "depth",
    units: "m",
    source: FieldSource::Column("depth (m)"),
}];

const ID_SPATIAL_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "id",
    units: "",
    source: FieldSource::Column("id"),
}];

const CREEP_TIMESERIES_TEMPORAL_FIELDS: &[FieldSpec] = &[FieldSpec {
    name: "strain",
    units: "",
    source: FieldSource::Column("strain"),
}];

static TEMPERATURE: FormatSpec = FormatSpec {
    tag: "temperature",
    legacy_name: "FileTemperature",
    extension: ".csv",
    variables: &[X, Y, var("t", Some("k"), "temperature at the location")],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x (m)",
        y: "y (m)",
        z: Some("z (m)"),
        fields: TEMPERATURE_SPATIAL_FIELDS,
        drop_incomplete: false,
    }),
    temporal: None,
};

static GV: FormatSpec = FormatSpec {
    tag: "gv",
    legacy_name: "FileGV",
    extension: ".csv",
    variables: &[
        X,
        Y,
        var("g", Some("k/m"), "temperature gradient at solidification"),
        var("v", Some("m/s"), "solidification velocity"),
    ],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x (m)",
        y: "y (m)",
        z: Some("z (m)"),
        fields: GV_SPATIAL_FIELDS,
        drop_incomplete: false,
    }),
    temporal: None,
};

static REDUCED_SOLIDIFICATION: FormatSpec = FormatSpec {
    tag: "reduced_solidification",
    legacy_name: "FileReducedSolidification",
    extension: ".csv",
    variables: &[
        var("x", None, "x coordinate"),
        var("y", None, "y coordinate"),
        var("z", None, "z coordinate"),
        var("tm", None, "time of melting"),
        var("ts", None, "time of solidification"),
        var("cr", None, "cooling rate"),
    ],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x",
        y: "y",
        z: Some("z"),
        fields: REDUCED_SOLIDIFICATION_SPATIAL_FIELDS,
        drop_incomplete: false,
    }),
    temporal: None,
};

const MELT_POOL_GEOMETRY_TEMPORAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "length",
        units: "m",
        source: FieldSource::Column("length (m)"),
    },
    FieldSpec {
        name: "width",
        units: "m",
        source: FieldSource::Column("width (m)"),
    },
    FieldSpec {
        name: "depth",
        units: "m",
        source: FieldSource::Column("depth (m)"),
    },
];

static MELT_POOL_GEOMETRY: FormatSpec = FormatSpec {
    tag: "melt_pool_geometry",
    legacy_name: "FileMeltPoolGeometry",
    extension: ".csv",
    variables: &[
        var("time", Some("s"), "time the melt pool was sampled"),
        X,
        Y,
        var("length", Some("m"), "melt pool length"),
        var("width", Some("m"), "melt pool width"),
        var("depth", Some("m"), "melt pool depth"),
    ],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x (m)",
        y: "y (m)",
        z: Some("z (m)"),
        fields: MELT_POOL_GEOMETRY_SPATIAL_FIELDS,
        drop_incomplete: true,
    }),
    temporal: Some(TemporalLayout {
        time: "time (s)",
        fields: MELT_POOL_GEOMETRY_TEMPORAL_FIELDS,
    }),
};

static DEPTH_MAP: FormatSpec = FormatSpec {
    tag: "depth_map",
    legacy_name: "FileDepthMap",
    extension: ".csv",
    variables: &[
        X,
        Y,
        var("depth", Some("m"), "melt pool depth the last time the point was molten"),
    ],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x (m)",
        y: "y (m)",
        z: None,
        fields: DEPTH_MAP_SPATIAL_FIELDS,
        drop_incomplete: false,
    }),
    temporal: None,
};

static ID: FormatSpec = FormatSpec {
    tag: "id",
    legacy_name: "FileID",
    extension: ".csv",
    variables: &[X, Y, var("id", None, "identifier of the location, e.g. a cluster id")],
    tabular: true,
    spatial: Some(SpatialLayout {
        x: "x (m)",
        y: "y (m)",
        z: None,
        fields: ID_SPATIAL_FIELDS,
        drop_incomplete: false,
    }),
    temporal: None,
};

static REGION: FormatSpec = FormatSpec {
    tag: "region",
    legacy_name: "FileRegion",
    extension: ".csv",
    variables: &[
        var("id", None, "region identifier"),
        X,
        Y,
        var("layer_starts", None, "first layer of the region"),
        var("layer_ends", None, "last layer of the region"),
        var("part", None, "part the region belongs to"),
    ],
    tabular: true,
    spatial: None,
    temporal: None,
};

static GRAIN_SLICE: FormatSpec = FormatSpec {
    tag: "grain_slice",
    legacy_name: "FileGrainSlice",
    extension: ".csv",
    variables: &[
        var("mean grain area", Some("m^2"), "mean grain area for the slice"),
        var("nucleated fraction", None, "area fraction of nucleated grains"),
        var(
            "wasserstein distance",
            Some("100-z"),
            "distance between the misorientation distribution and an isotropic reference",
        ),
    ],
    tabular: true,
    spatial: None,
    temporal: None,
};

static CREEP_TIMESERIES: FormatSpec = FormatSpec {
    tag: "creep_timeseries",
    legacy_name: "FileCreepTimeSeries",
    extension: ".csv",
    variables: &[
        var("strain", None, "average engineering strain of the simulated volume"),
        var("time", Some("s"), "elapsed simulation time"),
    ],
    tabular: true,
    spatial: None,
    temporal: Some(TemporalLayout {
        time: "time (s)",
        fields: CREEP_TIMESERIES_TEMPORAL_FIELDS,
    }),
};

static VTK: FormatSpec = FormatSpec {
    tag: "vtk",
    legacy_name: "FileVTK",
    extension: ".vtk",
    variables: &[],
    tabular: false,
    spatial: None,
    temporal: None,
};

static EXODUS: FormatSpec = FormatSpec {
    tag: "exodus",
    legacy_name: "FileExodus",
    extension: ".e",
    variables: &[],
    tabular: false,
    spatial: None,
    temporal: None,
};

/// Tag and legacy class name lookup.
static REGISTRY: Lazy<IndexMap<&'static str, ArtifactFormat>> = Lazy::new(|| {
    let mut map = IndexMap::new();
    for format in ArtifactFormat::ALL {
        let spec = format.spec();
        map.insert(spec.tag, format);
        map.insert(spec.legacy_name, format);
    }
    map
});

impl ArtifactFormat {
    pub const ALL: [ArtifactFormat; 11] = [
        Self::Temperature,
        Self::Gv,
        Self::ReducedSolidification,
        Self::MeltPoolGeometry,
        Self::DepthMap,
        Self::Id,
        Self::Region,
        Self::GrainSlice,
        Self::CreepTimeseries,
        Self::Vtk,
        Self::Exodus,
    ];

    pub fn spec(&self) -> &'static FormatSpec {
        match self {
            Self::Temperature => &TEMPERATURE,
            Self::Gv => &GV,
            Self::ReducedSolidification => &REDUCED_SOLIDIFICATION,
            Self::MeltPoolGeometry => &MELT_POOL_GEOMETRY,
            Self::DepthMap => &DEPTH_MAP,
            Self::Id => &ID,
            Self::Region => &REGION,
            Self::GrainSlice => &GRAIN_SLICE,
            Self::CreepTimeseries => &CREEP_TIMESERIES,
            Self::Vtk => &VTK,
            Self::Exodus => &EXODUS,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.spec().tag
    }

    pub fn extension(&self) -> &'static str {
        self.spec().extension
    }

    /// Looks up a format by tag or legacy class name.
    pub fn from_tag(tag: &str) -> Option<Self> {
        REGISTRY.get(tag.trim()).copied()
    }

    /// Binds a path to this format's capability implementation.
    pub fn open(&self, path: impl AsRef<Path>) -> Box<dyn Artifact> {
        let path = path.as_ref().to_path_buf();
        if self.spec().tabular {
            Box::new(CsvArtifact::new(path, *self))
        } else {
            Box::new(OpaqueArtifact { path, format: *self })
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("unknown artifact format '{}'", s))
    }
}

/// Binary formats this crate only checks by extension.
#[derive(Debug, Clone)]
pub struct OpaqueArtifact {
    path: std::path::PathBuf,
    format: ArtifactFormat,
}

impl Artifact for OpaqueArtifact {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> ArtifactFormat {
        self.format
    }

    fn file_is_valid(&self) -> bool {
        self.format.spec().matches_extension(&self.path) && self.path.is_file()
    }

    fn get_values_for_sync(&self, mode: SyncMode) -> Result<SyncValues, ArtifactError> {
        Err(ArtifactError::Unsupported {
            format: self.format.tag().to_string(),
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_registry_tags_and_legacy_names() {
        assert_eq!(ArtifactFormat::from_tag("gv"), Some(ArtifactFormat::Gv));
        assert_eq!(ArtifactFormat::from_tag("FileGV"), Some(ArtifactFormat::Gv));
        assert_eq!(
            "reduced_solidification".parse::<ArtifactFormat>().unwrap(),
            ArtifactFormat::ReducedSolidification
        );
        assert!(ArtifactFormat::from_tag("png").is_none());
    }

    #[test]
    fn test_every_format_roundtrips_through_its_tag() {
        for format in ArtifactFormat::ALL {
            assert_eq!(ArtifactFormat::from_tag(format.tag()), Some(format));
            let yaml = serde_yaml::to_string(&format).unwrap();
            assert_eq!(yaml.trim(), format.tag());
        }
    }

    #[test]
    fn test_required_headers() {
        assert_eq!(
            ArtifactFormat::Gv.spec().required_headers(),
            vec!["x (m)", "y (m)", "g (k/m)", "v (m/s)"]
        );
        assert!(ArtifactFormat::Vtk.spec().required_headers().is_empty());
    }

    #[test]
    fn test_opaque_validity_is_extension_only() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("mesh.e");
        let bad = dir.path().join("mesh.exo");
        fs::write(&good, b"\x00\x01").unwrap();
        fs::write(&bad, b"\x00\x01").unwrap();

        assert!(ArtifactFormat::Exodus.open(&good).file_is_valid());
        assert!(!ArtifactFormat::Exodus.open(&bad).file_is_valid());
        assert!(!ArtifactFormat::Exodus.open(dir.path().join("none.e")).file_is_valid());
    }

    #[test]
    fn test_opaque_sync_is_unsupported() {
        let artifact = ArtifactFormat::Vtk.open("grains.vtk");
        assert!(matches!(
            artifact.get_values_for_sync(SyncMode::Spatial2d),
            Err(ArtifactError::Unsupported { .. })
        ));
    }
}
