//! Tabular Artifact Reader
//!
//! Minimal reader for the comma-separated outputs collaborators write:
//! one header line followed by numeric rows. Headers are compared
//! case-insensitively, so `"X (m)"` and `"x (m)"` are the same column.
//! Cells may be double-quoted; a quoted cell can hold commas and `""`
//! escapes.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::formats::{ArtifactFormat, FieldSource, FieldSpec};
use super::{Artifact, ArtifactError, Locator, SyncField, SyncMode, SyncValues};

/// Parsed CSV content with lower-cased headers.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    path: PathBuf,
    headers: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl CsvTable {
    /// Reads and parses a whole CSV file.
    ///
    /// Empty or absent cells become NaN. Non-numeric cells also become NaN
    /// and are reported in a warning.
    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let content = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let headers = lines.next().map(parse_header_line).unwrap_or_default();
        let mut columns = vec![Vec::new(); headers.len()];
        let mut bad_cells = 0;
        let mut first_bad: Option<(usize, String)> = None;

        for (row, line) in lines.enumerate() {
            let cells = split_cells(line);
            for (i, column) in columns.iter_mut().enumerate() {
                let cell = cells.get(i).map_or("", |c| c.trim());
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().unwrap_or_else(|_| {
                        bad_cells += 1;
                        if first_bad.is_none() {
                            first_bad = Some((row + 2, cell.to_string()));
                        }
                        f64::NAN
                    })
                };
                column.push(value);
            }
        }

        if let Some((line, cell)) = first_bad {
            warn!(
                "{}: {} non-numeric cell(s) read as NaN, first '{}' on line {}",
                path.display(),
                bad_cells,
                cell,
                line
            );
        }

        debug!(
            "Read {} row(s) with columns {:?} from {}",
            columns.first().map_or(0, Vec::len),
            headers,
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            columns,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Column values by (case-insensitive) header name.
    pub fn column(&self, name: &str) -> Result<&[f64], ArtifactError> {
        self.index_of(name)
            .map(|i| self.columns[i].as_slice())
            .ok_or_else(|| ArtifactError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.headers.iter().position(|h| *h == wanted)
    }
}

/// Reads only the header line of a CSV file.
pub fn read_header(path: &Path) -> std::io::Result<Vec<String>> {
    let file = File::open(path)?;
    let mut first = String::new();
    BufReader::new(file).read_line(&mut first)?;
    Ok(parse_header_line(&first))
}

fn parse_header_line(line: &str) -> Vec<String> {
    split_cells(line)
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect()
}

/// Splits a line on commas outside double quotes and unquotes each cell.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

/// Artifact backed by a CSV file with a registered column layout.
#[derive(Debug, Clone)]
pub struct CsvArtifact {
    path: PathBuf,
    format: ArtifactFormat,
}

impl CsvArtifact {
    pub fn new(path: impl Into<PathBuf>, format: ArtifactFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    fn extract_fields(
        &self,
        table: &CsvTable,
        specs: &[FieldSpec],
    ) -> Result<Vec<SyncField>, ArtifactError> {
        specs
            .iter()
            .map(|spec| {
                let values = match spec.source {
                    FieldSource::Column(name) => table.column(name)?.to_vec(),
                    FieldSource::Product(a, b) => table
                        .column(a)?
                        .iter()
                        .zip(table.column(b)?)
                        .map(|(x, y)| x * y)
                        .collect(),
                };
                Ok(SyncField {
                    name: spec.name.to_string(),
                    units: spec.units.to_string(),
                    values,
                })
            })
            .collect()
    }

    fn spatial_values(&self, mode: SyncMode) -> Result<SyncValues, ArtifactError> {
        let spec = self.format.spec();
        let layout = spec.spatial.as_ref().ok_or_else(|| self.unsupported(mode))?;
        let table = CsvTable::read(&self.path)?;

        let x = table.column(layout.x)?;
        let y = table.column(layout.y)?;
        let mut fields = self.extract_fields(&table, layout.fields)?;

        let mut keep = vec![true; table.row_count()];

        // Volumetric data is reduced to its top slice
        let z = match layout.z {
            Some(z_name) if table.has_column(z_name) => Some(table.column(z_name)?),
            Some(z_name) if mode == SyncMode::Spatial3d => {
                return Err(ArtifactError::MissingColumn {
                    path: self.path.clone(),
                    column: z_name.to_string(),
                })
            }
            None if mode == SyncMode::Spatial3d => return Err(self.unsupported(mode)),
            _ => None,
        };
        if let Some(z) = z {
            let top = z
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(f64::NEG_INFINITY, f64::max);
            for (k, value) in keep.iter_mut().zip(z) {
                *k &= *value == top;
            }
        }

        if layout.drop_incomplete {
            for (i, k) in keep.iter_mut().enumerate() {
                let complete = x[i].is_finite()
                    && y[i].is_finite()
                    && fields.iter().all(|f| f.values[i].is_finite());
                *k &= complete;
            }
        }

        let x = select(x, &keep);
        let y = select(y, &keep);
        for field in &mut fields {
            field.values = select(&field.values, &keep);
        }

        Ok(SyncValues {
            locator: Locator::Spatial { x, y },
            fields,
        })
    }

    fn temporal_values(&self) -> Result<SyncValues, ArtifactError> {
        let spec = self.format.spec();
        let layout = spec
            .temporal
            .as_ref()
            .ok_or_else(|| self.unsupported(SyncMode::Temporal))?;
        let table = CsvTable::read(&self.path)?;

        let time = table.column(layout.time)?.to_vec();
        let fields = self.extract_fields(&table, layout.fields)?;

        Ok(SyncValues {
            locator: Locator::Temporal { time },
            fields,
        })
    }

    fn unsupported(&self, mode: SyncMode) -> ArtifactError {
        ArtifactError::Unsupported {
            format: self.format.tag().to_string(),
            mode,
        }
    }
}

impl Artifact for CsvArtifact {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> ArtifactFormat {
        self.format
    }

    fn file_is_valid(&self) -> bool {
        let spec = self.format.spec();
        if !spec.matches_extension(&self.path) || !self.path.is_file() {
            return false;
        }

        let headers = match read_header(&self.path) {
            Ok(headers) => headers,
            Err(e) => {
                debug!("Could not read header of {}: {}", self.path.display(), e);
                return false;
            }
        };

        let missing: Vec<String> = spec
            .required_headers()
            .into_iter()
            .filter(|h| !headers.contains(h))
            .collect();

        if !missing.is_empty() {
            warn!(
                "{} is missing required column(s) {:?} (found {:?})",
                self.path.display(),
                missing,
                headers
            );
            return false;
        }
        true
    }

    fn get_values_for_sync(&self, mode: SyncMode) -> Result<SyncValues, ArtifactError> {
        match mode {
            SyncMode::Spatial2d | SyncMode::Spatial3d => self.spatial_values(mode),
            SyncMode::Temporal => self.temporal_values(),
        }
    }
}

fn select(values: &[f64], keep: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| *v)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_table_headers_are_lowercased() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "X (m), \"Y (m)\",T (K)\n1,2,3\n4,5,abc\n");

        let table = CsvTable::read(&path).unwrap();
        assert_eq!(table.headers(), &["x (m)", "y (m)", "t (k)"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("X (M)").unwrap(), &[1.0, 4.0]);
        assert!(table.column("t (k)").unwrap()[1].is_nan());
        assert!(table.column("z (m)").is_err());
    }

    #[test]
    fn test_quoted_cells_are_unquoted() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "t.csv",
            "\"x (m)\",\"y (m)\",\"t (k)\"\n\"1.0\", \"2.5\" ,\"300\"\n",
        );

        let table = CsvTable::read(&path).unwrap();
        assert_eq!(table.column("x (m)").unwrap(), &[1.0]);
        assert_eq!(table.column("y (m)").unwrap(), &[2.5]);
        assert_eq!(table.column("t (k)").unwrap(), &[300.0]);
    }

    #[test]
    fn test_split_cells_keeps_commas_inside_quotes() {
        assert_eq!(split_cells("a,\"b,c\",d"), vec!["a", "b,c", "d"]);
        assert_eq!(split_cells("\"say \"\"hi\"\"\",1"), vec!["say \"hi\"", "1"]);
        assert_eq!(split_cells("1,,3\r"), vec!["1", "", "3"]);
    }

    #[test]
    fn test_gv_is_valid_with_extra_columns() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "gv.csv",
            "X (m),Y (m),G (K/m),V (m/s),extra\n0,0,1,2,9\n",
        );
        assert!(CsvArtifact::new(&path, ArtifactFormat::Gv).file_is_valid());
    }

    #[test]
    fn test_invalid_when_column_missing_or_wrong_extension() {
        let dir = tempdir().unwrap();
        let missing = write(dir.path(), "gv.csv", "x (m),y (m),g (k/m)\n0,0,1\n");
        let wrong_ext = write(dir.path(), "gv.txt", "x (m),y (m),g (k/m),v (m/s)\n0,0,1,2\n");
        let absent = dir.path().join("absent.csv");

        assert!(!CsvArtifact::new(missing, ArtifactFormat::Gv).file_is_valid());
        assert!(!CsvArtifact::new(wrong_ext, ArtifactFormat::Gv).file_is_valid());
        assert!(!CsvArtifact::new(absent, ArtifactFormat::Gv).file_is_valid());
    }

    #[test]
    fn test_gv_spatial_values_with_derived_cooling_rate() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "gv.csv",
            "x (m),y (m),z (m),g (k/m),v (m/s)\n\
             0.0,0.0,0.1,10,2\n\
             0.1,0.0,0.2,20,3\n\
             0.2,0.0,0.2,30,4\n",
        );

        let values = CsvArtifact::new(&path, ArtifactFormat::Gv)
            .get_values_for_sync(SyncMode::Spatial2d)
            .unwrap();

        assert_eq!(
            values.locator,
            Locator::Spatial {
                x: vec![0.1, 0.2],
                y: vec![0.0, 0.0]
            }
        );
        assert_eq!(values.field("G").unwrap().values, vec![20.0, 30.0]);
        assert_eq!(values.field("cooling_rate").unwrap().values, vec![60.0, 120.0]);
        assert_eq!(values.field("cooling_rate").unwrap().units, "K/s");
    }

    #[test]
    fn test_spatial_3d_requires_z_column() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "gv.csv", "x (m),y (m),g (k/m),v (m/s)\n0,0,1,1\n");

        let err = CsvArtifact::new(&path, ArtifactFormat::Gv)
            .get_values_for_sync(SyncMode::Spatial3d)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingColumn { .. }));
    }

    #[test]
    fn test_temporal_unsupported_for_gv() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "gv.csv", "x (m),y (m),g (k/m),v (m/s)\n0,0,1,1\n");

        let err = CsvArtifact::new(&path, ArtifactFormat::Gv)
            .get_values_for_sync(SyncMode::Temporal)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Unsupported { .. }));
    }

    #[test]
    fn test_melt_pool_drops_incomplete_rows() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "mp.csv",
            "time (s),x (m),y (m),length (m),width (m),depth (m)\n\
             0.1,0,0,1,1,1\n\
             0.2,0,1,,1,1\n",
        );

        let values = CsvArtifact::new(&path, ArtifactFormat::MeltPoolGeometry)
            .get_values_for_sync(SyncMode::Spatial2d)
            .unwrap();
        assert_eq!(values.locator.len(), 1);

        let series = CsvArtifact::new(&path, ArtifactFormat::MeltPoolGeometry)
            .get_values_for_sync(SyncMode::Temporal)
            .unwrap();
        assert_eq!(series.locator, Locator::Temporal { time: vec![0.1, 0.2] });
    }
}
