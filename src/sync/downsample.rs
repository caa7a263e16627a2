//! Preview Downsampling
//!
//! Rasterizes an accumulator's scattered points onto a square grid covering
//! the build plate. Every point that lands in a pixel takes part in the
//! reduction; none of them simply overwrites another.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persist::write_atomic;
use crate::sync::accumulator::LayerAccumulator;

/// How points sharing a pixel are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Max,
    Min,
    Average,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Average => "average",
        };
        f.write_str(name)
    }
}

impl FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "average" | "mean" => Ok(Self::Average),
            other => Err(format!("unknown reduction '{}' (expected max, min or average)", other)),
        }
    }
}

/// Square grid of pixel values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    size: usize,
    pixels: Vec<f64>,
}

impl Image {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            pixels: vec![0.0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.pixels[row * self.size + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.pixels[row * self.size + col] = value;
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    /// Rotates 90 degrees counterclockwise.
    pub fn rot90(&self) -> Self {
        let n = self.size;
        let mut rotated = Self::new(n);
        for r in 0..n {
            for c in 0..n {
                rotated.set(r, c, self.get(c, n - 1 - r));
            }
        }
        rotated
    }
}

/// Pixel index of a coordinate, or `None` when it falls off the grid.
fn pixel_index(coord: f64, origin: f64, pixel_size: f64, size: usize) -> Option<usize> {
    let scaled = ((coord - origin) / pixel_size + 0.5).floor();
    if scaled.is_finite() && scaled >= 0.0 && scaled < size as f64 {
        Some(scaled as usize)
    } else {
        None
    }
}

/// Downsamples scattered points to an `image_size` square image spanning
/// `plate_size` meters from `bottom_left`.
///
/// Grid rows follow x and columns follow y before the final rotation, so in
/// the returned image row 0 is the back edge of the plate. Empty pixels are 0.
pub fn downsample_to_image(
    x: &[f64],
    y: &[f64],
    values: &[f64],
    image_size: usize,
    plate_size: f64,
    bottom_left: (f64, f64),
    reduction: Reduction,
) -> Image {
    let mut image = Image::new(image_size);
    if image_size == 0 || !plate_size.is_finite() || plate_size <= 0.0 {
        return image;
    }
    let pixel_size = plate_size / image_size as f64;
    let mut counts = vec![0usize; image_size * image_size];

    for ((px, py), value) in x.iter().zip(y).zip(values) {
        if !value.is_finite() {
            continue;
        }
        let (Some(i), Some(j)) = (
            pixel_index(*px, bottom_left.0, pixel_size, image_size),
            pixel_index(*py, bottom_left.1, pixel_size, image_size),
        ) else {
            continue;
        };

        let k = i * image_size + j;
        let current = image.pixels[k];
        image.pixels[k] = match (reduction, counts[k]) {
            (_, 0) => *value,
            (Reduction::Max, _) => current.max(*value),
            (Reduction::Min, _) => current.min(*value),
            (Reduction::Average, _) => current + value,
        };
        counts[k] += 1;
    }

    if reduction == Reduction::Average {
        for (pixel, count) in image.pixels.iter_mut().zip(&counts) {
            if *count > 0 {
                *pixel /= *count as f64;
            }
        }
    }

    image.rot90()
}

/// Downsamples an accumulator with its own plate size.
pub fn accumulator_image(acc: &LayerAccumulator, image_size: usize, reduction: Reduction) -> Image {
    downsample_to_image(
        &acc.coords_x,
        &acc.coords_y,
        &acc.values,
        image_size,
        acc.plate_size,
        (0.0, 0.0),
        reduction,
    )
}

/// Encodes an image as binary 8-bit PGM using the accumulator's byte map.
pub fn encode_pgm(image: &Image, acc: &LayerAccumulator) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", image.size(), image.size());
    let mut content = header.into_bytes();
    content.extend(image.pixels().iter().map(|v| acc.encode(*v)));
    content
}

/// Writes the preview of an accumulator beside its bundle.
pub fn write_preview(path: &Path, acc: &LayerAccumulator, image_size: usize, reduction: Reduction) -> Result<()> {
    let image = accumulator_image(acc, image_size, reduction);
    write_atomic(path, &encode_pgm(&image, acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn same_pixel(reduction: Reduction) -> f64 {
        // Three points in the pixel at grid (1, 2) of a 4x4 image
        let image = downsample_to_image(
            &[1.0, 1.1, 0.9],
            &[2.0, 2.1, 1.9],
            &[1.0, 5.0, 3.0],
            4,
            4.0,
            (0.0, 0.0),
            reduction,
        );
        // After rotation grid (i, j) sits at row n-1-j, column i
        image.get(4 - 1 - 2, 1)
    }

    #[test]
    fn test_reductions_combine_all_points() {
        assert_eq!(same_pixel(Reduction::Max), 5.0);
        assert_eq!(same_pixel(Reduction::Min), 1.0);
        assert_eq!(same_pixel(Reduction::Average), 3.0);
    }

    #[test]
    fn test_max_of_negative_value_ignores_empty_pixel() {
        let image = downsample_to_image(&[0.0], &[0.0], &[-4.0], 2, 2.0, (0.0, 0.0), Reduction::Max);
        assert_eq!(image.get(1, 0), -4.0);
    }

    #[test]
    fn test_empty_pixels_are_zero() {
        let image = downsample_to_image(&[0.0], &[0.0], &[8.0], 3, 3.0, (0.0, 0.0), Reduction::Average);
        let nonzero = image.pixels().iter().filter(|v| **v != 0.0).count();
        assert_eq!(nonzero, 1);
        assert!(image.pixels().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_points_off_plate_and_non_finite_are_dropped() {
        let image = downsample_to_image(
            &[-2.0, 10.0, f64::NAN, 0.0],
            &[0.0, 0.0, 0.0, 0.0],
            &[1.0, 1.0, 1.0, f64::NAN],
            4,
            4.0,
            (0.0, 0.0),
            Reduction::Max,
        );
        assert!(image.pixels().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_pixel_index_rounds_to_nearest_center() {
        assert_eq!(pixel_index(0.0, 0.0, 1.0, 4), Some(0));
        assert_eq!(pixel_index(0.49, 0.0, 1.0, 4), Some(0));
        assert_eq!(pixel_index(0.5, 0.0, 1.0, 4), Some(1));
        assert_eq!(pixel_index(3.6, 0.0, 1.0, 4), None);
        assert_eq!(pixel_index(-0.6, 0.0, 1.0, 4), None);
    }

    #[test]
    fn test_rot90_counterclockwise() {
        let mut image = Image::new(2);
        image.set(0, 0, 1.0);
        image.set(0, 1, 2.0);
        image.set(1, 0, 3.0);
        image.set(1, 1, 4.0);

        let rotated = image.rot90();
        assert_eq!(rotated.pixels(), &[2.0, 4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_back_edge_is_first_row() {
        // Point at the back-left corner of the plate
        let image = downsample_to_image(&[0.0], &[3.0], &[1.0], 4, 4.0, (0.0, 0.0), Reduction::Max);
        assert_eq!(image.get(0, 0), 1.0);
    }

    #[test]
    fn test_reduction_parse() {
        assert_eq!("MAX".parse::<Reduction>().unwrap(), Reduction::Max);
        assert_eq!("mean".parse::<Reduction>().unwrap(), Reduction::Average);
        assert!("median".parse::<Reduction>().is_err());
        assert_eq!(Reduction::Average.to_string(), "average");
    }

    #[test]
    fn test_write_preview_pgm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registered/v/0000001.pgm");

        let mut acc = LayerAccumulator::new("K", 2.0);
        acc.replace_part(1, &[0.0, 1.0], &[0.0, 1.0], &[0.0, 255.0]).unwrap();
        acc.update_affine();
        write_preview(&path, &acc, 2, Reduction::Average).unwrap();

        let content = fs::read(&path).unwrap();
        let header = b"P5\n2 2\n255\n";
        assert_eq!(&content[..header.len()], header);
        let pixels = &content[header.len()..];
        assert_eq!(pixels.len(), 4);
        // (1, 1) lands top-right after rotation, (0, 0) bottom-left
        assert_eq!(pixels, &[0, 255, 0, 0]);
    }
}
