//! Case Addressing
//!
//! Expands a step's hierarchy type-list into concrete case directories:
//!
//! - `[]` → one case per build: `root/B1/step/`
//! - `[part, layer]` → `root/B1/P1/1/step/`, `root/B1/P1/2/step/`, ...
//! - `[part, region]` → `root/B1/P1/R1/step/`
//! - `[build_region, layer]` → `root/B1/BR1/10/step/`
//!
//! Expansion follows hierarchy insertion order, so the same build always
//! yields the same list in the same order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::workflow::hierarchy::Build;

/// One level of the build hierarchy a step can iterate over.
///
/// Variants are ordered outermost first, which is also the order path
/// components and template placeholders are resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Build,
    BuildRegion,
    Part,
    Region,
    Layer,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::BuildRegion => "build_region",
            Self::Part => "part",
            Self::Region => "region",
            Self::Layer => "layer",
        }
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HierarchyLevel {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "build" => Ok(Self::Build),
            "build_region" => Ok(Self::BuildRegion),
            "part" => Ok(Self::Part),
            "region" => Ok(Self::Region),
            "layer" => Ok(Self::Layer),
            other => Err(WorkflowError::config(format!(
                "unknown hierarchy type '{}' (expected build, build_region, part, region or layer)",
                other
            ))),
        }
    }
}

/// A validated, ordered set of hierarchy levels.
///
/// An empty list (or one holding only `build`) means the step runs once
/// per build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<HierarchyLevel>", into = "Vec<HierarchyLevel>")]
pub struct TypeList(Vec<HierarchyLevel>);

impl TypeList {
    /// Build-level type list.
    pub fn build() -> Self {
        Self(Vec::new())
    }

    /// Validates and normalizes a list of levels.
    ///
    /// Levels must nest: `region` needs `part`, and `build_region` cannot
    /// be combined with `part` or `region`.
    pub fn new(levels: &[HierarchyLevel]) -> Result<Self, WorkflowError> {
        let mut sorted: Vec<HierarchyLevel> = levels
            .iter()
            .copied()
            .filter(|l| *l != HierarchyLevel::Build)
            .collect();
        sorted.sort();
        sorted.dedup();

        let has = |level| sorted.contains(&level);
        if has(HierarchyLevel::Region) && !has(HierarchyLevel::Part) {
            return Err(WorkflowError::config(
                "type 'region' requires type 'part'",
            ));
        }
        if has(HierarchyLevel::BuildRegion)
            && (has(HierarchyLevel::Part) || has(HierarchyLevel::Region))
        {
            return Err(WorkflowError::config(
                "type 'build_region' cannot be combined with 'part' or 'region'",
            ));
        }

        Ok(Self(sorted))
    }

    /// Parses type names such as `["part", "layer"]`.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, WorkflowError> {
        let levels = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<HierarchyLevel>, _>>()?;
        Self::new(&levels)
    }

    pub fn contains(&self, level: HierarchyLevel) -> bool {
        self.0.contains(&level)
    }

    pub fn is_build_level(&self) -> bool {
        self.0.is_empty()
    }

    pub fn levels(&self) -> &[HierarchyLevel] {
        &self.0
    }
}

impl TryFrom<Vec<HierarchyLevel>> for TypeList {
    type Error = WorkflowError;

    fn try_from(levels: Vec<HierarchyLevel>) -> Result<Self, Self::Error> {
        Self::new(&levels)
    }
}

impl From<TypeList> for Vec<HierarchyLevel> {
    fn from(list: TypeList) -> Self {
        list.0
    }
}

/// Position of one case in the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub build: String,
    pub build_region: Option<String>,
    pub part: Option<String>,
    pub region: Option<String>,
    pub layer: Option<u32>,
}

impl Coordinate {
    pub fn build(name: impl Into<String>) -> Self {
        Self {
            build: name.into(),
            ..Default::default()
        }
    }

    /// Directory of this coordinate relative to the workflow root,
    /// without the step name.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(&self.build);
        if let Some(build_region) = &self.build_region {
            dir.push(build_region);
        }
        if let Some(part) = &self.part {
            dir.push(part);
        }
        if let Some(region) = &self.region {
            dir.push(region);
        }
        if let Some(layer) = self.layer {
            dir.push(layer.to_string());
        }
        dir
    }

    /// Placeholder values, outermost first.
    pub fn placeholders(&self) -> Vec<(HierarchyLevel, String)> {
        let mut values = vec![(HierarchyLevel::Build, self.build.clone())];
        if let Some(build_region) = &self.build_region {
            values.push((HierarchyLevel::BuildRegion, build_region.clone()));
        }
        if let Some(part) = &self.part {
            values.push((HierarchyLevel::Part, part.clone()));
        }
        if let Some(region) = &self.region {
            values.push((HierarchyLevel::Region, region.clone()));
        }
        if let Some(layer) = self.layer {
            values.push((HierarchyLevel::Layer, layer.to_string()));
        }
        values
    }

    /// Replaces `{build}`, `{part}`, ... in a template. Unknown
    /// placeholders are left untouched.
    pub fn substitute(&self, template: &str) -> String {
        self.placeholders()
            .into_iter()
            .fold(template.to_string(), |text, (level, value)| {
                substitute_placeholder(&text, level.as_str(), &value)
            })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_dir().display())
    }
}

/// A concrete case: where it sits in the hierarchy and where its file lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub coordinate: Coordinate,
    /// Case directory (`root/<coordinate>/<step>`)
    pub dir: PathBuf,
    /// Resolved template path inside the case directory
    pub path: PathBuf,
}

/// Deterministic mapping from (step, type-list, template) to case paths.
#[derive(Debug, Clone)]
pub struct AddressScheme {
    root: PathBuf,
}

impl AddressScheme {
    /// Creates a scheme rooted at the workflow document's directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerates every hierarchy coordinate the type-list selects.
    ///
    /// A `region` type on a part with no `regions` map yields an empty
    /// list for the whole build; the condition is logged, not raised.
    pub fn coordinates(&self, build: &Build, types: &TypeList) -> Vec<Coordinate> {
        let mut coords = Vec::new();

        if types.contains(HierarchyLevel::BuildRegion) {
            for (name, region) in &build.build_regions {
                let base = Coordinate {
                    build_region: Some(name.clone()),
                    ..Coordinate::build(&build.name)
                };
                push_layers(&mut coords, base, &region.layerlist, types.contains(HierarchyLevel::Layer));
            }
        } else if types.contains(HierarchyLevel::Part) {
            for (part_name, part) in &build.parts {
                let base = Coordinate {
                    part: Some(part_name.clone()),
                    ..Coordinate::build(&build.name)
                };

                if types.contains(HierarchyLevel::Region) {
                    let Some(regions) = &part.regions else {
                        warn!(
                            "Part '{}' has no regions defined; no region cases were generated",
                            part_name
                        );
                        return Vec::new();
                    };
                    for (region_name, region) in regions {
                        let region_base = Coordinate {
                            region: Some(region_name.clone()),
                            ..base.clone()
                        };
                        push_layers(&mut coords, region_base, &region.layers, types.contains(HierarchyLevel::Layer));
                    }
                } else {
                    push_layers(&mut coords, base, &part.layers, types.contains(HierarchyLevel::Layer));
                }
            }
        } else if types.contains(HierarchyLevel::Layer) {
            let mut layers: Vec<u32> = build
                .parts
                .values()
                .flat_map(|p| p.layers.iter().copied())
                .collect();
            layers.sort_unstable();
            layers.dedup();
            push_layers(&mut coords, Coordinate::build(&build.name), &layers, true);
        } else {
            coords.push(Coordinate::build(&build.name));
        }

        debug!(
            "Expanded types {:?} into {} coordinate(s)",
            types.levels(),
            coords.len()
        );
        coords
    }

    /// Case directory for a coordinate and step.
    pub fn case_dir(&self, coordinate: &Coordinate, step_name: &str) -> PathBuf {
        self.root.join(coordinate.relative_dir()).join(step_name)
    }

    /// Resolves every case of a step, keeping the coordinate alongside
    /// the path.
    pub fn resolve_cases(
        &self,
        step_name: &str,
        types: &TypeList,
        template: &str,
        build: &Build,
    ) -> Vec<Case> {
        self.coordinates(build, types)
            .into_iter()
            .map(|coordinate| {
                let dir = self.case_dir(&coordinate, step_name);
                let resolved = coordinate.substitute(template);
                let path = if resolved.is_empty() {
                    dir.clone()
                } else {
                    dir.join(resolved)
                };
                Case {
                    coordinate,
                    dir,
                    path,
                }
            })
            .collect()
    }

    /// Resolves a template to the ordered list of case file paths.
    ///
    /// An empty template resolves to the case directories themselves.
    pub fn resolve(
        &self,
        step_name: &str,
        types: &TypeList,
        template: &str,
        build: &Build,
    ) -> Vec<PathBuf> {
        self.resolve_cases(step_name, types, template, build)
            .into_iter()
            .map(|case| case.path)
            .collect()
    }
}

fn push_layers(coords: &mut Vec<Coordinate>, base: Coordinate, layers: &[u32], per_layer: bool) {
    if per_layer {
        coords.extend(layers.iter().map(|layer| Coordinate {
            layer: Some(*layer),
            ..base.clone()
        }));
    } else {
        coords.push(base);
    }
}

/// Substitutes a `{name}` placeholder in a string with a concrete value.
pub fn substitute_placeholder(text: &str, name: &str, value: &str) -> String {
    text.replace(&format!("{{{}}}", name), value)
}

/// Extracts placeholder names from a template.
pub fn extract_placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_placeholder = false;
    let mut current = String::new();

    for ch in template.chars() {
        match ch {
            '{' => {
                in_placeholder = true;
                current.clear();
            }
            '}' => {
                if in_placeholder && !current.is_empty() {
                    names.push(current.clone());
                    current.clear();
                }
                in_placeholder = false;
            }
            _ => {
                if in_placeholder {
                    current.push(ch);
                }
            }
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(names: &[&str]) -> TypeList {
        TypeList::parse(names).unwrap()
    }

    #[test]
    fn test_part_layer_expansion() {
        let build = Build::new("B1").with_part("P1", &[1, 2]);
        let scheme = AddressScheme::new("/w");

        let paths = scheme.resolve("A", &types(&["part", "layer"]), "a.csv", &build);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/w/B1/P1/1/A/a.csv"),
                PathBuf::from("/w/B1/P1/2/A/a.csv"),
            ]
        );
    }

    #[test]
    fn test_build_level_expansion() {
        let build = Build::new("B1").with_part("P1", &[1, 2]);
        let scheme = AddressScheme::new("/w");

        let paths = scheme.resolve("collect", &TypeList::build(), "out.csv", &build);
        assert_eq!(paths, vec![PathBuf::from("/w/B1/collect/out.csv")]);
    }

    #[test]
    fn test_part_region_layer_expansion() {
        let build = Build::new("B1")
            .with_region("P1", "R1", &[5, 6])
            .with_region("P1", "R2", &[7]);
        let scheme = AddressScheme::new("/w");

        let paths = scheme.resolve("m", &types(&["layer", "region", "part"]), "", &build);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/w/B1/P1/R1/5/m"),
                PathBuf::from("/w/B1/P1/R1/6/m"),
                PathBuf::from("/w/B1/P1/R2/7/m"),
            ]
        );
    }

    #[test]
    fn test_region_without_regions_map_is_empty() {
        let build = Build::new("B1")
            .with_region("P1", "R1", &[5])
            .with_part("P2", &[1]);
        let scheme = AddressScheme::new("/w");

        let paths = scheme.resolve("m", &types(&["part", "region"]), "x.csv", &build);
        assert!(paths.is_empty());
    }

    #[test]
    fn test_build_region_expansion() {
        let build = Build::new("B1")
            .with_part("P1", &[1])
            .with_build_region("BR1", &["P1"], &[10, 11]);
        let scheme = AddressScheme::new("/w");

        let paths = scheme.resolve("s", &types(&["build_region", "layer"]), "g.csv", &build);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/w/B1/BR1/10/s/g.csv"),
                PathBuf::from("/w/B1/BR1/11/s/g.csv"),
            ]
        );
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let build = Build::new("B1")
            .with_part("P3", &[2, 1])
            .with_part("P1", &[4]);
        let scheme = AddressScheme::new("/w");
        let list = types(&["part", "layer"]);

        let first = scheme.resolve("t", &list, "{part}_{layer}.csv", &build);
        let second = scheme.resolve("t", &list, "{part}_{layer}.csv", &build);
        assert_eq!(first, second);
        assert_eq!(first[0], PathBuf::from("/w/B1/P3/2/t/P3_2.csv"));
        assert_eq!(first[2], PathBuf::from("/w/B1/P1/4/t/P1_4.csv"));
    }

    #[test]
    fn test_template_substitution_leaves_unknown_placeholders() {
        let coord = Coordinate {
            part: Some("P1".to_string()),
            layer: Some(3),
            ..Coordinate::build("B1")
        };
        assert_eq!(
            coord.substitute("{build}-{part}-{layer}-{sample}.csv"),
            "B1-P1-3-{sample}.csv"
        );
    }

    #[test]
    fn test_type_list_validation() {
        assert!(TypeList::parse(&["region"]).is_err());
        assert!(TypeList::parse(&["build_region", "part"]).is_err());
        assert!(TypeList::parse(&["bogus"]).is_err());
        assert!(TypeList::parse(&["build"]).unwrap().is_build_level());

        let list = TypeList::parse(&["layer", "part", "layer"]).unwrap();
        assert_eq!(list.levels(), &[HierarchyLevel::Part, HierarchyLevel::Layer]);
    }

    #[test]
    fn test_type_list_serde() {
        let list: TypeList = serde_yaml::from_str("[part, region]").unwrap();
        assert!(list.contains(HierarchyLevel::Region));

        let bad: Result<TypeList, _> = serde_yaml::from_str("[region]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_extract_placeholder_names() {
        assert_eq!(
            extract_placeholder_names("{part}/{layer}.csv"),
            vec!["part", "layer"]
        );
        assert!(extract_placeholder_names("plain.csv").is_empty());
    }
}
