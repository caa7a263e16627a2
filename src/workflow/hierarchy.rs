//! Build Hierarchy
//!
//! Data structures for the nested build description stored in the
//! `data.build` section of a workflow document:
//!
//! ```yaml
//! build:
//!   name: B1
//!   parts:
//!     P1:
//!       layers: [1, 2]
//!       regions:
//!         R1:
//!           layers: [50, 51, 52]
//!   build_regions:
//!     BR1:
//!       partlist: [P1, P2]
//!       layerlist: [10, 11]
//! ```
//!
//! All maps preserve insertion order so that case expansion is deterministic
//! and documents round-trip without reordering. Keys this crate does not
//! interpret are kept in `extra` and written back untouched.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Uninterpreted keys carried through a round-trip.
pub type Extra = IndexMap<String, Value>;

/// Per-layer metadata keyed by layer number. Keys may be written as
/// integers or strings, so the raw YAML mapping is kept.
pub type LayerData = Mapping;

/// The build plate: root of the hierarchy.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Build {
    /// Build name, used as the first path component of every case
    #[serde(default)]
    pub name: String,

    /// Location of the build database (used as the default sync target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub parts: IndexMap<String, Part>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub build_regions: IndexMap<String, BuildRegion>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A part printed on the build plate.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<u32>,

    /// Regions of interest. `None` means the part was never subdivided,
    /// which is different from an explicitly empty map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<IndexMap<String, Region>>,

    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub layer_data: LayerData,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A sub-volume of a part.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Region {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<u32>,

    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub layer_data: LayerData,

    #[serde(flatten)]
    pub extra: Extra,
}

/// A region spanning several parts, addressed directly under the build.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BuildRegion {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partlist: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layerlist: Vec<u32>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parts: IndexMap<String, Part>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Build {
    /// Creates an empty build with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a part with a list of layers (builder style, mostly for tests).
    pub fn with_part(mut self, name: impl Into<String>, layers: &[u32]) -> Self {
        self.parts.insert(name.into(), Part::with_layers(layers));
        self
    }

    /// Adds a region to an existing part, creating the part if needed.
    pub fn with_region(mut self, part: &str, region: impl Into<String>, layers: &[u32]) -> Self {
        let entry = self.parts.entry(part.to_string()).or_default();
        entry
            .regions
            .get_or_insert_with(IndexMap::new)
            .insert(region.into(), Region::with_layers(layers));
        self
    }

    /// Adds a build region spanning the listed parts.
    pub fn with_build_region(
        mut self,
        name: impl Into<String>,
        parts: &[&str],
        layers: &[u32],
    ) -> Self {
        self.build_regions.insert(
            name.into(),
            BuildRegion {
                partlist: parts.iter().map(|p| p.to_string()).collect(),
                layerlist: layers.to_vec(),
                ..Default::default()
            },
        );
        self
    }

    /// Every part name referenced by the build, including build region
    /// part lists, in first-seen order.
    pub fn all_part_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parts.keys().cloned().collect();
        for region in self.build_regions.values() {
            for part in region.partlist.iter().chain(region.parts.keys()) {
                if !names.contains(part) {
                    names.push(part.clone());
                }
            }
        }
        names
    }

    /// Looks up the layer list of a region inside a part.
    pub fn region_layers(&self, part: &str, region: &str) -> Option<&[u32]> {
        self.parts
            .get(part)?
            .regions
            .as_ref()?
            .get(region)
            .map(|r| r.layers.as_slice())
    }
}

impl Part {
    pub fn with_layers(layers: &[u32]) -> Self {
        Self {
            layers: layers.to_vec(),
            ..Default::default()
        }
    }
}

impl Region {
    pub fn with_layers(layers: &[u32]) -> Self {
        Self {
            layers: layers.to_vec(),
            ..Default::default()
        }
    }

    /// Layer a region contributes to when synced as a whole.
    pub fn representative_layer(&self) -> Option<u32> {
        representative_layer(&self.layers)
    }
}

/// Picks the layer at index `ceil(n/2)` of the sorted list, clamped to the
/// last entry. `None` when the list is empty.
pub fn representative_layer(layers: &[u32]) -> Option<u32> {
    if layers.is_empty() {
        return None;
    }
    let mut sorted = layers.to_vec();
    sorted.sort_unstable();
    let index = ((sorted.len() + 1) / 2).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Extracts the numeric part identifier from a part name (`"P12"` → 12).
///
/// The digits must form the end of the name; `"P1a"` and `"P1_2"` have no
/// number.
pub fn part_number(name: &str) -> Option<u32> {
    let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if prefix.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    name[prefix.len()..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_yaml_roundtrip_preserves_order_and_extras() {
        let yaml = r#"
name: B1
build_data:
  laser_power: 370
parts:
  P2:
    layers: [3, 1]
    layer_data:
      3: {scanpath: a.txt}
  P1:
    layers: [1]
    regions:
      R1:
        layers: [5]
"#;
        let build: Build = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(build.name, "B1");
        assert_eq!(build.parts.keys().collect::<Vec<_>>(), vec!["P2", "P1"]);
        assert_eq!(build.parts["P2"].layers, vec![3, 1]);
        assert!(build.parts["P2"].regions.is_none());
        assert!(build.extra.contains_key("build_data"));
        assert_eq!(build.parts["P2"].layer_data.len(), 1);

        let text = serde_yaml::to_string(&build).unwrap();
        let again: Build = serde_yaml::from_str(&text).unwrap();
        assert_eq!(build, again);
    }

    #[test]
    fn test_all_part_names_includes_build_regions() {
        let build = Build::new("B1")
            .with_part("P1", &[1])
            .with_build_region("BR1", &["P1", "P7"], &[1]);
        assert_eq!(build.all_part_names(), vec!["P1", "P7"]);
    }

    #[test]
    fn test_region_layers_lookup() {
        let build = Build::new("B1").with_region("P1", "R1", &[4, 5]);
        assert_eq!(build.region_layers("P1", "R1"), Some(&[4, 5][..]));
        assert_eq!(build.region_layers("P1", "R2"), None);
        assert_eq!(build.region_layers("P9", "R1"), None);
    }

    #[test]
    fn test_representative_layer() {
        assert_eq!(representative_layer(&[]), None);
        assert_eq!(representative_layer(&[7]), Some(7));
        assert_eq!(representative_layer(&[52, 50, 51]), Some(52));
        assert_eq!(representative_layer(&[9, 8]), Some(9));
        assert_eq!(representative_layer(&[1, 2, 3, 4]), Some(3));
    }

    #[test]
    fn test_part_number() {
        assert_eq!(part_number("P1"), Some(1));
        assert_eq!(part_number("P12"), Some(12));
        assert_eq!(part_number("part"), None);
        assert_eq!(part_number("part_7"), Some(7));
        assert_eq!(part_number("P1a"), None);
        assert_eq!(part_number("P1_2"), None);
        assert_eq!(part_number("12"), Some(12));
    }
}
