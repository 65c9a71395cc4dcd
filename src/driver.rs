//! Batch measurement of mask radii over a source list.
//!
//! For each source the runner
//!
//! 1. skips it if its position lies outside the image,
//! 2. optionally skips a random fraction of faint sources (a uniform draw from
//!    the runner's seeded generator against `keep_prob`),
//! 3. measures its radial profile and, if any bin was filled, interpolates the
//!    mask radius and stores it on the source.
//!
//! Sources that are skipped or yield no usable profile keep
//! [`MASK_RADIUS_SENTINEL`](crate::MASK_RADIUS_SENTINEL). Such per-source
//! failures are counted in the [`MeasureSummary`]; only a sampler overflow
//! aborts a run.

use anyhow::{anyhow, ensure, Result};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::grid::ImageStack;
use crate::profile::{Profile, ProfileMeasurer};
use crate::radius::estimate_radius;
use crate::sink::ProfileSink;
use crate::source::Source;
use crate::stats::{RobustStatistic, SigmaClip};

/// Configuration for a mask-radius run.
#[derive(Debug, Clone)]
pub struct MaskRadiusConfig {
    /// Width of each radial bin in pixels.
    /// Default: 1.0
    pub binsize: f64,

    /// Outer radius cutoff in pixels. The profile has `ceil(rmax / binsize)`
    /// bins.
    /// Default: 100.0
    pub rmax: f64,

    /// Sources with magnitude greater than this are candidates for random
    /// subsampling. `None` disables subsampling.
    /// Default: None
    pub faint_mag: Option<f64>,

    /// Probability that a faint source is measured. Only used together with
    /// `faint_mag`.
    /// Default: 1.0
    pub keep_prob: f64,

    /// Seed for the subsampling generator built by
    /// [`MaskRadiusRunner::with_seed`].
    /// Default: 42
    pub seed: u64,

    /// Outlier clipping used for the per-bin standard error.
    /// Default: 4-sigma, at most 4 iterations
    pub clip: SigmaClip,
}

impl Default for MaskRadiusConfig {
    fn default() -> Self {
        Self {
            binsize: 1.0,
            rmax: 100.0,
            faint_mag: None,
            keep_prob: 1.0,
            seed: 42,
            clip: SigmaClip::default(),
        }
    }
}

impl MaskRadiusConfig {
    /// Number of radial bins.
    pub fn nbin(&self) -> usize {
        (self.rmax / self.binsize).ceil() as usize
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.binsize > 0.0 && self.binsize.is_finite(),
            "binsize must be positive, got {}",
            self.binsize
        );
        ensure!(
            self.rmax > 0.0 && self.rmax.is_finite(),
            "rmax must be positive, got {}",
            self.rmax
        );
        ensure!(
            (0.0..=1.0).contains(&self.keep_prob),
            "keep_prob must lie in [0, 1], got {}",
            self.keep_prob
        );
        ensure!(
            self.clip.nsig > 0.0,
            "clip.nsig must be positive, got {}",
            self.clip.nsig
        );
        Ok(())
    }
}

/// What happened to one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceOutcome {
    /// Mask radius measured and stored (pixels).
    Measured(f64),
    /// Position outside the image.
    OutOfBounds,
    /// Faint source dropped by random subsampling.
    Subsampled,
    /// No bin received a usable pixel, or no bin had a positive value.
    NoProfile,
}

/// Per-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasureSummary {
    pub total: usize,
    pub measured: usize,
    pub out_of_bounds: usize,
    pub subsampled: usize,
    /// Sources that were measured but produced no usable profile.
    pub failed: usize,
}

impl MeasureSummary {
    fn tally(&mut self, outcome: SourceOutcome) {
        self.total += 1;
        match outcome {
            SourceOutcome::Measured(_) => self.measured += 1,
            SourceOutcome::OutOfBounds => self.out_of_bounds += 1,
            SourceOutcome::Subsampled => self.subsampled += 1,
            SourceOutcome::NoProfile => self.failed += 1,
        }
    }
}

/// Measures mask radii for batches of sources.
///
/// The subsampling generator is injected; [`with_seed`](Self::with_seed)
/// builds a reproducible [`StdRng`] from the config seed.
pub struct MaskRadiusRunner<R = StdRng> {
    config: MaskRadiusConfig,
    rng: R,
}

impl MaskRadiusRunner<StdRng> {
    /// Runner whose generator is seeded from `config.seed`.
    pub fn with_seed(config: MaskRadiusConfig) -> Result<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::new(config, rng)
    }
}

impl<R: RngExt> MaskRadiusRunner<R> {
    pub fn new(config: MaskRadiusConfig, rng: R) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &MaskRadiusConfig {
        &self.config
    }

    /// Measure every source in order, reusing one set of scratch buffers.
    ///
    /// Each measured profile is passed to `sink` when one is given.
    pub fn run(
        &mut self,
        sources: &mut [Source],
        stack: &ImageStack,
        onesigma: f64,
        mut sink: Option<&mut dyn ProfileSink>,
    ) -> Result<MeasureSummary> {
        self.check_floor(onesigma)?;
        let nbin = self.bin_count(stack);
        self.log_start(sources.len(), nbin, onesigma);

        let mut measurer =
            ProfileMeasurer::with_statistic(stack, self.config.binsize, self.config.clip)?;
        let mut profile = Profile::try_new(nbin)?;

        let mut summary = MeasureSummary::default();
        for source in sources.iter_mut() {
            let outcome = match self.screen(stack, source) {
                Some(skipped) => skipped,
                None => {
                    let outcome =
                        measure_source(&mut measurer, &mut profile, stack, source, onesigma)?;
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.record(&format!("source {}", source.id), &profile, onesigma);
                    }
                    outcome
                }
            };
            summary.tally(outcome);
        }

        log_finish(&summary);
        Ok(summary)
    }

    /// Measure sources across rayon workers.
    ///
    /// Subsampling draws are made sequentially before any measurement, in
    /// source order, so the result is identical to [`run`](Self::run) for the
    /// same generator state. Every rayon job builds its own fresh scratch
    /// buffers.
    pub fn run_parallel(
        &mut self,
        sources: &mut [Source],
        stack: &ImageStack,
        onesigma: f64,
    ) -> Result<MeasureSummary> {
        self.check_floor(onesigma)?;
        let nbin = self.bin_count(stack);
        self.log_start(sources.len(), nbin, onesigma);

        let screens: Vec<Option<SourceOutcome>> =
            sources.iter().map(|s| self.screen(stack, s)).collect();

        let (binsize, clip) = (self.config.binsize, self.config.clip);

        let outcomes = sources
            .par_iter_mut()
            .zip(screens.into_par_iter())
            .map_init(
                || -> Result<(ProfileMeasurer, Profile)> {
                    Ok((
                        ProfileMeasurer::with_statistic(stack, binsize, clip)?,
                        Profile::try_new(nbin)?,
                    ))
                },
                |scratch, (source, screen)| match (screen, scratch) {
                    (Some(skipped), _) => Ok(skipped),
                    (None, Ok((measurer, profile))) => {
                        measure_source(measurer, profile, stack, source, onesigma)
                    }
                    (None, Err(e)) => Err(anyhow!("Worker setup failed: {:#}", e)),
                },
            )
            .collect::<Result<Vec<SourceOutcome>>>()?;

        let mut summary = MeasureSummary::default();
        for outcome in outcomes {
            summary.tally(outcome);
        }

        log_finish(&summary);
        Ok(summary)
    }

    /// Decide whether a source is skipped before measurement.
    ///
    /// Consumes one draw from the generator per in-bounds faint source.
    fn screen(&mut self, stack: &ImageStack, source: &Source) -> Option<SourceOutcome> {
        if !stack.contains(source.row, source.col) {
            debug!(
                "Source {} at ({:.2}, {:.2}) is outside the image",
                source.id, source.row, source.col
            );
            return Some(SourceOutcome::OutOfBounds);
        }
        if let Some(faint_mag) = self.config.faint_mag {
            if source.mag > faint_mag {
                let draw: f64 = self.rng.random();
                if draw > self.config.keep_prob {
                    return Some(SourceOutcome::Subsampled);
                }
            }
        }
        None
    }

    fn check_floor(&self, onesigma: f64) -> Result<()> {
        ensure!(
            onesigma > 0.0 && onesigma.is_finite(),
            "Noise floor must be positive and finite, got {}",
            onesigma
        );
        Ok(())
    }

    /// Bins in use for `stack`: the configured count, cut at the first bin
    /// that starts beyond the image diagonal since no pixel can reach it.
    fn bin_count(&self, stack: &ImageStack) -> usize {
        let diag = (stack.nrows() as f64).hypot(stack.ncols() as f64);
        let reach = ((diag / self.config.binsize).ceil() as usize).saturating_add(1);
        self.config.nbin().min(reach)
    }

    fn log_start(&self, nsources: usize, nbin: usize, onesigma: f64) {
        info!(
            "Measuring mask radii for {} sources: {} bins of {} px, onesigma = {:.5}",
            nsources,
            nbin,
            self.config.binsize,
            onesigma
        );
    }
}

/// Measure one in-bounds source and store its radius.
fn measure_source<S: RobustStatistic>(
    measurer: &mut ProfileMeasurer<S>,
    profile: &mut Profile,
    stack: &ImageStack,
    source: &mut Source,
    onesigma: f64,
) -> Result<SourceOutcome> {
    let summary = measurer.measure(stack, source.row, source.col, onesigma, profile)?;
    if summary.filled_bins == 0 {
        warn!(
            "Source {} at ({:.2}, {:.2}): no usable pixels in any bin",
            source.id, source.row, source.col
        );
        return Ok(SourceOutcome::NoProfile);
    }

    match estimate_radius(profile, onesigma) {
        Some(radius) => {
            debug!(
                "Source {}: mask radius {:.2} px from {} bins",
                source.id, radius, summary.filled_bins
            );
            source.mask_radius = radius;
            Ok(SourceOutcome::Measured(radius))
        }
        None => {
            warn!(
                "Source {} at ({:.2}, {:.2}): profile has no positive values",
                source.id, source.row, source.col
            );
            Ok(SourceOutcome::NoProfile)
        }
    }
}

fn log_finish(summary: &MeasureSummary) {
    info!(
        "Measured {} of {} sources ({} out of bounds, {} subsampled, {} failed)",
        summary.measured,
        summary.total,
        summary.out_of_bounds,
        summary.subsampled,
        summary.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ProfileSnapshot;
    use crate::source::MASK_RADIUS_SENTINEL;
    use crate::{Image, Mask, SegMap, WeightMap};

    /// Flat background of zero with a bright exponential star at (20, 20).
    fn star_stack() -> ImageStack {
        let image = Image::from_fn(41, 41, |r, c| {
            let d = ((r as f64 - 20.0).powi(2) + (c as f64 - 20.0).powi(2)).sqrt();
            (100.0 * (-d / 2.0).exp()) as f32
        });
        ImageStack::from_image(image).unwrap()
    }

    fn small_config() -> MaskRadiusConfig {
        MaskRadiusConfig {
            binsize: 1.0,
            rmax: 18.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_nbin_and_validation() {
        let config = MaskRadiusConfig {
            binsize: 0.75,
            rmax: 10.0,
            ..Default::default()
        };
        assert_eq!(config.nbin(), 14);
        assert!(config.validate().is_ok());

        let bad = MaskRadiusConfig {
            keep_prob: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = MaskRadiusConfig {
            binsize: 0.0,
            ..Default::default()
        };
        assert!(MaskRadiusRunner::with_seed(bad).is_err());
    }

    #[test]
    fn test_out_of_bounds_source_keeps_sentinel() {
        let stack = star_stack();
        let mut sources = vec![
            Source::new(1, 20.0, 20.0, 15.0),
            Source::new(2, -3.0, 10.0, 15.0),
            Source::new(3, 10.0, 41.5, 15.0),
        ];
        let mut runner = MaskRadiusRunner::with_seed(small_config()).unwrap();
        let summary = runner.run(&mut sources, &stack, 1.0, None).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.measured, 1);
        assert_eq!(summary.out_of_bounds, 2);
        assert!(sources[0].is_measured());
        assert_eq!(sources[1].mask_radius, MASK_RADIUS_SENTINEL);
        assert_eq!(sources[2].mask_radius, MASK_RADIUS_SENTINEL);
    }

    #[test]
    fn test_measured_radius_near_crossing() {
        // 100 exp(-r/2) = 1 at r = 2 ln(100) ~ 9.21
        let stack = star_stack();
        let mut sources = vec![Source::new(1, 20.0, 20.0, 12.0)];
        let mut runner = MaskRadiusRunner::with_seed(small_config()).unwrap();
        runner.run(&mut sources, &stack, 1.0, None).unwrap();
        let expected = 2.0 * 100f64.ln();
        assert!(
            (sources[0].mask_radius - expected).abs() < 0.5,
            "radius {} expected ~{}",
            sources[0].mask_radius,
            expected
        );
    }

    #[test]
    fn test_faint_sources_subsampled() {
        let stack = star_stack();
        let mut sources = vec![
            Source::new(1, 20.0, 20.0, 14.0),
            Source::new(2, 20.0, 20.0, 21.0),
            Source::new(3, 20.0, 20.0, 22.0),
        ];
        let config = MaskRadiusConfig {
            faint_mag: Some(20.0),
            keep_prob: 0.0,
            ..small_config()
        };
        let mut runner = MaskRadiusRunner::with_seed(config).unwrap();
        let summary = runner.run(&mut sources, &stack, 1.0, None).unwrap();
        assert_eq!(summary.measured, 1);
        assert_eq!(summary.subsampled, 2);
        assert!(sources[0].is_measured());
        assert!(!sources[1].is_measured());
        assert!(!sources[2].is_measured());
    }

    #[test]
    fn test_keep_all_when_probability_one() {
        let stack = star_stack();
        let mut sources: Vec<Source> = (0..5).map(|i| Source::new(i, 20.0, 20.0, 25.0)).collect();
        let config = MaskRadiusConfig {
            faint_mag: Some(20.0),
            keep_prob: 1.0,
            ..small_config()
        };
        let mut runner = MaskRadiusRunner::with_seed(config).unwrap();
        let summary = runner.run(&mut sources, &stack, 1.0, None).unwrap();
        assert_eq!(summary.measured, 5);
        assert_eq!(summary.subsampled, 0);
    }

    #[test]
    fn test_subsampling_is_reproducible() {
        let stack = star_stack();
        let make = || -> Vec<Source> { (0..40).map(|i| Source::new(i, 20.0, 20.0, 21.0)).collect() };
        let config = MaskRadiusConfig {
            faint_mag: Some(20.0),
            keep_prob: 0.5,
            seed: 7,
            ..small_config()
        };

        let mut a = make();
        let mut b = make();
        MaskRadiusRunner::with_seed(config.clone())
            .unwrap()
            .run(&mut a, &stack, 1.0, None)
            .unwrap();
        MaskRadiusRunner::with_seed(config)
            .unwrap()
            .run(&mut b, &stack, 1.0, None)
            .unwrap();
        assert_eq!(a, b);
        let kept = a.iter().filter(|s| s.is_measured()).count();
        assert!(kept > 0 && kept < 40, "kept {}", kept);
    }

    #[test]
    fn test_fully_masked_source_counts_as_failure() {
        let n = 21;
        let stack = ImageStack::new(
            Image::from_element(n, n, 5.0),
            Mask::from_element(n, n, 1),
            WeightMap::from_element(n, n, 1.0),
            SegMap::zeros(n, n),
        )
        .unwrap();
        let mut sources = vec![Source::new(9, 10.0, 10.0, 15.0)];
        let mut runner = MaskRadiusRunner::with_seed(MaskRadiusConfig {
            rmax: 8.0,
            ..Default::default()
        })
        .unwrap();
        let summary = runner.run(&mut sources, &stack, 1.0, None).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.measured, 0);
        assert_eq!(sources[0].mask_radius, MASK_RADIUS_SENTINEL);
    }

    #[test]
    fn test_sink_receives_measured_profiles() {
        let stack = star_stack();
        let mut sources = vec![
            Source::new(4, 20.0, 20.0, 15.0),
            Source::new(5, 100.0, 100.0, 15.0),
        ];
        let mut snapshots: Vec<ProfileSnapshot> = Vec::new();
        let mut runner = MaskRadiusRunner::with_seed(small_config()).unwrap();
        let sink: &mut dyn ProfileSink = &mut snapshots;
        runner.run(&mut sources, &stack, 1.0, Some(sink)).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].label, "source 4");
        assert_eq!(snapshots[0].profile.nbin(), 18);
        assert!(snapshots[0].profile.has_filled());
    }

    #[test]
    fn test_rejects_bad_noise_floor() {
        let stack = star_stack();
        let mut sources = vec![Source::new(1, 20.0, 20.0, 15.0)];
        let mut runner = MaskRadiusRunner::with_seed(small_config()).unwrap();
        assert!(runner.run(&mut sources, &stack, 0.0, None).is_err());
        assert!(runner.run_parallel(&mut sources, &stack, f64::NAN).is_err());
    }

    #[test]
    fn test_huge_rmax_is_cut_at_image_diagonal() {
        let stack = ImageStack::from_image(Image::from_element(16, 16, 10.0)).unwrap();
        let config = MaskRadiusConfig {
            rmax: 1e30,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let mut sources = vec![Source::new(1, 8.0, 8.0, 15.0)];
        let mut snapshots: Vec<ProfileSnapshot> = Vec::new();
        let mut runner = MaskRadiusRunner::with_seed(config).unwrap();
        let sink: &mut dyn ProfileSink = &mut snapshots;
        let summary = runner.run(&mut sources, &stack, 1.0, Some(sink)).unwrap();
        assert_eq!(summary.measured, 1);
        // ceil(hypot(16, 16)) + 1
        assert_eq!(snapshots[0].profile.nbin(), 24);

        let mut parallel = vec![Source::new(1, 8.0, 8.0, 15.0)];
        let summary = runner.run_parallel(&mut parallel, &stack, 1.0).unwrap();
        assert_eq!(summary.measured, 1);
        assert_eq!(parallel, sources);
    }

    #[test]
    fn test_unallocatable_bin_count_is_an_error() {
        let stack = ImageStack::from_image(Image::from_element(16, 16, 10.0)).unwrap();
        let config = MaskRadiusConfig {
            binsize: 1e-300,
            rmax: 1e30,
            ..Default::default()
        };
        let mut sources = vec![Source::new(1, 8.0, 8.0, 15.0)];
        let mut runner = MaskRadiusRunner::with_seed(config).unwrap();
        assert!(runner.run(&mut sources, &stack, 1.0, None).is_err());
        assert!(runner.run_parallel(&mut sources, &stack, 1.0).is_err());
        assert_eq!(sources[0].mask_radius, MASK_RADIUS_SENTINEL);
    }

    #[test]
    fn test_zero_valued_profile_counts_as_failure() {
        // Every bin fills with value 0: no logarithm to interpolate
        let stack = ImageStack::from_image(Image::zeros(21, 21)).unwrap();
        let mut sources = vec![Source::new(3, 10.0, 10.0, 15.0)];
        let mut runner = MaskRadiusRunner::with_seed(small_config()).unwrap();
        let summary = runner.run(&mut sources, &stack, 1.0, None).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.measured, 0);
        assert_eq!(sources[0].mask_radius, MASK_RADIUS_SENTINEL);
    }

    #[test]
    fn test_parallel_many_sources_matches_sequential() {
        let stack = star_stack();
        let make = || -> Vec<Source> {
            (0..200)
                .map(|i| Source::new(i, 5.0 + (i % 31) as f64, 5.0 + (i % 29) as f64, 21.0))
                .collect()
        };
        let config = MaskRadiusConfig {
            faint_mag: Some(20.0),
            keep_prob: 0.7,
            seed: 3,
            ..small_config()
        };

        let mut sequential = make();
        let seq = MaskRadiusRunner::with_seed(config.clone())
            .unwrap()
            .run(&mut sequential, &stack, 1.0, None)
            .unwrap();
        let mut parallel = make();
        let par = MaskRadiusRunner::with_seed(config)
            .unwrap()
            .run_parallel(&mut parallel, &stack, 1.0)
            .unwrap();
        assert_eq!(seq, par);
        assert_eq!(sequential, parallel);
        assert_eq!(seq.total, 200);
    }
}
