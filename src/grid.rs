//! The four co-registered pixel grids consumed by the measurement.
//!
//! An [`ImageStack`] bundles the science image, bad-pixel mask, inverse-variance
//! weight map and segmentation map. All four share one shape and are read-only
//! for the lifetime of a run, so a stack can be shared freely between workers.

use anyhow::{ensure, Result};

use crate::stats::median;
use crate::{Image, Mask, SegMap, WeightMap};

#[derive(Debug, Clone)]
pub struct ImageStack {
    /// Pixel intensities.
    pub image: Image,
    /// Nonzero marks a pixel unusable for every source.
    pub mask: Mask,
    /// Inverse variance; a value `<= 0` marks the pixel unusable.
    pub weight: WeightMap,
    /// Object labels: 0 is unassigned background, any other value is the one
    /// detected object that owns the pixel.
    pub seg: SegMap,
}

impl ImageStack {
    /// Bundle the grids, checking that all four have identical dimensions.
    pub fn new(image: Image, mask: Mask, weight: WeightMap, seg: SegMap) -> Result<Self> {
        let shape = image.shape();
        ensure!(
            mask.shape() == shape,
            "Mask shape {:?} does not match image shape {:?}",
            mask.shape(),
            shape
        );
        ensure!(
            weight.shape() == shape,
            "Weight map shape {:?} does not match image shape {:?}",
            weight.shape(),
            shape
        );
        ensure!(
            seg.shape() == shape,
            "Segmentation map shape {:?} does not match image shape {:?}",
            seg.shape(),
            shape
        );
        ensure!(shape.0 > 0 && shape.1 > 0, "Image has no pixels");
        Ok(Self {
            image,
            mask,
            weight,
            seg,
        })
    }

    /// Build a stack from an image alone: nothing masked, unit weights, no
    /// segmentation.
    pub fn from_image(image: Image) -> Result<Self> {
        let (nrows, ncols) = image.shape();
        Self::new(
            image,
            Mask::zeros(nrows, ncols),
            WeightMap::from_element(nrows, ncols, 1.0),
            SegMap::zeros(nrows, ncols),
        )
    }

    pub fn nrows(&self) -> usize {
        self.image.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.image.ncols()
    }

    /// Total pixel count; the worst-case size of a single annulus sample.
    pub fn npix(&self) -> usize {
        self.image.len()
    }

    /// `true` when a continuous pixel position lies inside the image.
    pub fn contains(&self, row: f64, col: f64) -> bool {
        row >= 0.0
            && col >= 0.0
            && row <= (self.nrows() - 1) as f64
            && col <= (self.ncols() - 1) as f64
    }

    /// Segmentation label at the pixel nearest a continuous position.
    ///
    /// The position must satisfy [`contains`](Self::contains).
    pub fn seg_at(&self, row: f64, col: f64) -> i32 {
        self.seg[(row.round() as usize, col.round() as usize)]
    }

    /// Background one-sigma noise level, `sqrt(1 / median(weight))`.
    ///
    /// The median is taken over finite, positive weights only; unusable pixels
    /// would otherwise drag it toward zero.
    pub fn noise_floor(&self) -> Result<f64> {
        let mut weights: Vec<f32> = self
            .weight
            .iter()
            .copied()
            .filter(|w| w.is_finite() && *w > 0.0)
            .collect();
        ensure!(
            !weights.is_empty(),
            "Weight map has no positive weights; cannot derive the noise floor"
        );
        let med = median(&mut weights);
        Ok((1.0 / med).sqrt())
    }
}
