//! Component Classes
//!
//! A component class fixes what kind of work a step does: which hierarchy
//! levels it iterates over and which artifact formats it consumes and
//! produces. Workflow files refer to classes by name; the names are part of
//! the file format and must not change.

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::artifact::ArtifactFormat;
use crate::workflow::address::HierarchyLevel;

use HierarchyLevel::{BuildRegion, Layer, Part, Region};

/// Static description of a component class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentClass {
    pub name: &'static str,
    pub types: &'static [HierarchyLevel],
    pub input: Option<ArtifactFormat>,
    pub output: Option<ArtifactFormat>,
}

const fn class(
    name: &'static str,
    types: &'static [HierarchyLevel],
    input: Option<ArtifactFormat>,
    output: Option<ArtifactFormat>,
) -> ComponentClass {
    ComponentClass {
        name,
        types,
        input,
        output,
    }
}

const PART_LAYER: &[HierarchyLevel] = &[Part, Layer];
const PART_REGION_LAYER: &[HierarchyLevel] = &[Part, Region, Layer];
const PART_REGION: &[HierarchyLevel] = &[Part, Region];
const PART_ONLY: &[HierarchyLevel] = &[Part];
const BUILD_REGION_LAYER: &[HierarchyLevel] = &[BuildRegion, Layer];

const CLASSES: &[ComponentClass] = &[
    class("general", &[], None, None),
    class("solidification_part", PART_LAYER, None, Some(ArtifactFormat::Gv)),
    class(
        "solidification_region",
        PART_REGION_LAYER,
        Some(ArtifactFormat::Region),
        Some(ArtifactFormat::Gv),
    ),
    class(
        "solidification_build_region",
        BUILD_REGION_LAYER,
        Some(ArtifactFormat::Region),
        Some(ArtifactFormat::Gv),
    ),
    class(
        "solidification_part_reduced",
        PART_LAYER,
        None,
        Some(ArtifactFormat::ReducedSolidification),
    ),
    class(
        "solidification_region_reduced",
        PART_REGION_LAYER,
        Some(ArtifactFormat::Region),
        Some(ArtifactFormat::ReducedSolidification),
    ),
    class("temperature_part", PART_LAYER, None, Some(ArtifactFormat::Temperature)),
    class(
        "cluster_solidification",
        PART_LAYER,
        Some(ArtifactFormat::Gv),
        Some(ArtifactFormat::Id),
    ),
    class(
        "cluster_supervoxel",
        PART_LAYER,
        Some(ArtifactFormat::Id),
        Some(ArtifactFormat::Id),
    ),
    class(
        "microstructure_part",
        PART_ONLY,
        Some(ArtifactFormat::ReducedSolidification),
        Some(ArtifactFormat::Vtk),
    ),
    class(
        "microstructure_region",
        PART_REGION,
        Some(ArtifactFormat::ReducedSolidification),
        Some(ArtifactFormat::Vtk),
    ),
    class(
        "microstructure_region_slice",
        PART_REGION,
        Some(ArtifactFormat::ReducedSolidification),
        Some(ArtifactFormat::GrainSlice),
    ),
    class(
        "rve_selection",
        PART_ONLY,
        Some(ArtifactFormat::Id),
        Some(ArtifactFormat::Region),
    ),
    class("rve_part_center", PART_ONLY, None, Some(ArtifactFormat::Region)),
    class("mesh_part", PART_ONLY, None, None),
    class("mesh_part_vtk", PART_ONLY, None, Some(ArtifactFormat::Vtk)),
    class(
        "vtk_to_exodus_part",
        PART_ONLY,
        Some(ArtifactFormat::Vtk),
        Some(ArtifactFormat::Exodus),
    ),
    class(
        "vtk_to_exodus_region",
        PART_REGION,
        Some(ArtifactFormat::Vtk),
        Some(ArtifactFormat::Exodus),
    ),
    class(
        "melt_pool_geometry_part",
        PART_LAYER,
        None,
        Some(ArtifactFormat::MeltPoolGeometry),
    ),
    class(
        "creep_timeseries_region",
        PART_REGION,
        Some(ArtifactFormat::Exodus),
        Some(ArtifactFormat::CreepTimeseries),
    ),
];

static REGISTRY: Lazy<IndexMap<&'static str, ComponentClass>> =
    Lazy::new(|| CLASSES.iter().map(|c| (c.name, *c)).collect());

/// Looks up a component class by name.
pub fn lookup(name: &str) -> Option<ComponentClass> {
    REGISTRY.get(name).copied()
}

/// All registered class names, in registration order.
pub fn class_names() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}
