//! Radial brightness profile of a single source.
//!
//! The profile is a fixed number of radial bins of width `binsize`; bin `i`
//! covers radii `[i * binsize, (i + 1) * binsize]`. For each bin the
//! [`ProfileMeasurer`] samples the source's usable pixels, records the bin
//! midpoint, the median pixel value and a sigma-clipped standard error, and
//! stops walking outward once two consecutive filled bins satisfy
//! `value + 2 * err < onesigma`.
//!
//! A [`Profile`] is allocated once and reset before every source; bins that
//! were never filled keep `radius = 0`, `value = 0`, `err = +inf`.

use anyhow::{ensure, Context, Result};
use tracing::debug;

use crate::annulus::sample_annulus;
use crate::grid::ImageStack;
use crate::stats::{median, RobustStatistic, SigmaClip};

/// Index-aligned per-bin arrays of one radial profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// Bin midpoint, or 0 for an unfilled bin.
    pub radius: Vec<f64>,
    /// Median pixel value, or 0 for an unfilled bin.
    pub value: Vec<f64>,
    /// Robust standard error, or `+inf` for an unfilled bin.
    pub err: Vec<f64>,
}

impl Profile {
    /// Allocate a profile with `nbin` unfilled bins.
    pub fn new(nbin: usize) -> Self {
        Self {
            radius: vec![0.0; nbin],
            value: vec![0.0; nbin],
            err: vec![f64::INFINITY; nbin],
        }
    }

    /// Like [`new`](Self::new), but reports an allocation failure instead of
    /// aborting.
    pub fn try_new(nbin: usize) -> Result<Self> {
        let alloc = |fill: f64| -> Result<Vec<f64>> {
            let mut bins = Vec::new();
            bins.try_reserve_exact(nbin)
                .with_context(|| format!("Cannot allocate a profile of {} bins", nbin))?;
            bins.resize(nbin, fill);
            Ok(bins)
        };
        Ok(Self {
            radius: alloc(0.0)?,
            value: alloc(0.0)?,
            err: alloc(f64::INFINITY)?,
        })
    }

    pub fn nbin(&self) -> usize {
        self.radius.len()
    }

    /// Return every bin to its unfilled state without reallocating.
    pub fn reset(&mut self) {
        self.radius.fill(0.0);
        self.value.fill(0.0);
        self.err.fill(f64::INFINITY);
    }

    /// `true` when at least one bin was filled.
    pub fn has_filled(&self) -> bool {
        self.radius.iter().any(|&r| r > 0.0)
    }

    /// Filled bins as `(radius, value, err)`, in increasing radius.
    pub fn filled(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.radius
            .iter()
            .zip(self.value.iter())
            .zip(self.err.iter())
            .filter(|&((&r, _), _)| r > 0.0)
            .map(|((&r, &v), &e)| (r, v, e))
    }
}

/// How a profile measurement ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSummary {
    /// Number of bins that received at least one pixel.
    pub filled_bins: usize,
    /// Bin index at which the noise-floor rule stopped the walk, or `None`
    /// when every bin was visited.
    pub terminated_at: Option<usize>,
}

/// Builds radial profiles, reusing one pixel scratch buffer across sources.
///
/// The scratch buffer holds one value per image pixel so that a single
/// annulus can never overflow it. A measurer must not be shared between
/// concurrently measured sources; give each worker its own.
#[derive(Debug, Clone)]
pub struct ProfileMeasurer<S = SigmaClip> {
    binsize: f64,
    stat: S,
    scratch: Vec<f32>,
}

impl ProfileMeasurer<SigmaClip> {
    /// Measurer for `stack` using the default sigma clipping.
    pub fn new(stack: &ImageStack, binsize: f64) -> Result<Self> {
        Self::with_statistic(stack, binsize, SigmaClip::default())
    }
}

impl<S: RobustStatistic> ProfileMeasurer<S> {
    /// Measurer for `stack` using a custom robust statistic for the bin errors.
    pub fn with_statistic(stack: &ImageStack, binsize: f64, stat: S) -> Result<Self> {
        ensure!(
            binsize > 0.0 && binsize.is_finite(),
            "Bin size must be positive, got {}",
            binsize
        );
        Ok(Self {
            binsize,
            stat,
            scratch: vec![0.0; stack.npix()],
        })
    }

    pub fn binsize(&self) -> f64 {
        self.binsize
    }

    /// Measure the profile of the source at `(row, col)` into `profile`.
    ///
    /// `profile` is reset first; its length sets the number of bins. The
    /// source's segmentation label is read at the nearest pixel.
    ///
    /// # Errors
    ///
    /// Fails if the position lies outside the image, if `stack` is larger than
    /// the stack this measurer was built for, or if annulus sampling overflows.
    pub fn measure(
        &mut self,
        stack: &ImageStack,
        row: f64,
        col: f64,
        onesigma: f64,
        profile: &mut Profile,
    ) -> Result<ProfileSummary> {
        ensure!(
            stack.contains(row, col),
            "Source position ({}, {}) is outside the {}x{} image",
            row,
            col,
            stack.nrows(),
            stack.ncols()
        );
        ensure!(
            self.scratch.len() >= stack.npix(),
            "Scratch buffer holds {} pixels but the image has {}",
            self.scratch.len(),
            stack.npix()
        );

        profile.reset();
        let segval = stack.seg_at(row, col);

        let mut filled_bins = 0;
        let mut below_prev = false;
        for i in 0..profile.nbin() {
            let rmin = i as f64 * self.binsize;
            let rmax = (i + 1) as f64 * self.binsize;

            let count = sample_annulus(
                stack,
                row,
                col,
                rmin * rmin,
                rmax * rmax,
                segval,
                &mut self.scratch,
            )?;

            if count > 0 {
                let samples = &mut self.scratch[..count];
                profile.radius[i] = 0.5 * (rmin + rmax);
                profile.value[i] = median(samples);
                profile.err[i] = self.stat.clipped_stats(samples).err;
                filled_bins += 1;
            }

            // An empty bin keeps value 0 and err +inf, so it never counts as low
            let signal = profile.value[i] + 2.0 * profile.err[i];
            if signal < onesigma {
                if below_prev {
                    debug!(
                        "Profile at ({:.2}, {:.2}) reached the noise floor at bin {} (r = {:.2})",
                        row, col, i, profile.radius[i]
                    );
                    return Ok(ProfileSummary {
                        filled_bins,
                        terminated_at: Some(i),
                    });
                }
                below_prev = true;
            } else {
                below_prev = false;
            }
        }

        Ok(ProfileSummary {
            filled_bins,
            terminated_at: None,
        })
    }
}
