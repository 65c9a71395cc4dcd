//! # starmask
//!
//! Estimate, for every star in an astronomical image, the pixel radius at which
//! its light profile falls to the background noise floor (the "mask radius").
//!
//! Given an image together with its bad-pixel mask, inverse-variance weight map
//! and segmentation map, `starmask` walks outward from each star in fixed-width
//! annuli, builds a robust radial brightness profile, stops once the profile has
//! sat below the noise floor for two consecutive bins, and interpolates the
//! profile to the radius where it crosses that floor.
//!
//! ## Example
//!
//! ```no_run
//! use starmask::{read_source_csv, ImageStack, MaskRadiusConfig, MaskRadiusRunner};
//! # fn load() -> anyhow::Result<ImageStack> { unimplemented!() }
//!
//! let stack = load()?;
//! let mut sources = read_source_csv("data/stars.csv")?;
//!
//! let config = MaskRadiusConfig {
//!     binsize: 1.0,
//!     rmax: 80.0,
//!     faint_mag: Some(18.0),
//!     keep_prob: 0.2,
//!     ..Default::default()
//! };
//! let onesigma = stack.noise_floor()?;
//!
//! let mut runner = MaskRadiusRunner::with_seed(config)?;
//! let summary = runner.run(&mut sources, &stack, onesigma, None)?;
//! println!(
//!     "measured {} of {} stars ({} failed)",
//!     summary.measured, summary.total, summary.failed
//! );
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Annulus sampling**: collect the pixels in a radius band around the star
//!    that are unmasked, have positive weight and finite value, and are not
//!    owned by a different object in the segmentation map
//! 2. **Radial profile**: per bin, the median of the sampled pixels plus a
//!    sigma-clipped standard error; terminate after two consecutive bins with
//!    `value + 2·err` below the noise floor
//! 3. **Crossing radius**: sort the filled bins by `log10(value)` and linearly
//!    interpolate the radius at `log10(noise floor)`
//!
//! Sources are independent, so [`MaskRadiusRunner::run_parallel`] measures them
//! across rayon workers, each owning private scratch buffers.

pub mod annulus;
pub(crate) mod catalogs;
pub mod driver;
pub mod grid;
pub mod profile;
pub mod radius;
pub mod sink;
pub mod source;
pub mod stats;

pub use annulus::sample_annulus;
pub use catalogs::csv::read_source_csv;
pub use driver::{MaskRadiusConfig, MaskRadiusRunner, MeasureSummary, SourceOutcome};
pub use grid::ImageStack;
pub use profile::{Profile, ProfileMeasurer, ProfileSummary};
pub use radius::{estimate_radius, interpolate_crossing};
pub use sink::{ProfileSink, ProfileSnapshot, TracingSink};
pub use source::*;
pub use stats::{median, ClipStats, RobustStatistic, SigmaClip};

// Grid types. Pixel intensities and weights are stored as 32-bit floats, which
// is what survey images ship with; profile statistics are accumulated in f64.
pub type Image = nalgebra::DMatrix<f32>;
pub type Mask = nalgebra::DMatrix<i32>;
pub type WeightMap = nalgebra::DMatrix<f32>;
pub type SegMap = nalgebra::DMatrix<i32>;
