//! Robust sample statistics used to summarise one annulus of pixels.
//!
//! Both [`median`] and [`RobustStatistic::clipped_stats`] work in place on a
//! caller-owned scratch slice: they permute (and, for clipping, compact) the
//! samples but never allocate, so they can run once per radial bin without
//! touching the heap.

/// Median of a sample, reordering the slice.
///
/// For an even count the two middle values are averaged. Returns NaN for an
/// empty slice.
pub fn median(samples: &mut [f32]) -> f64 {
    let n = samples.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = samples.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper as f64;
    if n % 2 == 1 {
        return upper;
    }
    // Largest value of the lower partition is the other middle element
    let lower = lower
        .iter()
        .copied()
        .max_by(f32::total_cmp)
        .unwrap_or(upper as f32) as f64;
    0.5 * (lower + upper)
}

/// Summary of a clipped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipStats {
    /// Mean of the retained samples.
    pub mean: f64,
    /// Standard deviation of the retained samples.
    pub sigma: f64,
    /// Standard error of the mean, `sigma / sqrt(nkept)`.
    pub err: f64,
    /// Number of samples retained after clipping.
    pub nkept: usize,
}

/// An outlier-resistant estimate of location and its uncertainty.
///
/// Implementations must be deterministic for a fixed input multiset and may
/// reorder `samples`.
pub trait RobustStatistic {
    fn clipped_stats(&self, samples: &mut [f32]) -> ClipStats;
}

/// Iterative sigma clipping about the mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClip {
    /// Samples farther than `nsig * sigma` from the mean are rejected.
    /// Default: 4.0
    pub nsig: f64,

    /// Maximum number of clipping passes.
    /// Default: 4
    pub max_iter: usize,
}

impl Default for SigmaClip {
    fn default() -> Self {
        Self {
            nsig: 4.0,
            max_iter: 4,
        }
    }
}

impl RobustStatistic for SigmaClip {
    fn clipped_stats(&self, samples: &mut [f32]) -> ClipStats {
        let mut n = samples.len();
        if n == 0 {
            return ClipStats {
                mean: f64::NAN,
                sigma: f64::NAN,
                err: f64::INFINITY,
                nkept: 0,
            };
        }

        let (mut mean, mut sigma) = mean_std(&samples[..n]);
        for _ in 0..self.max_iter {
            let limit = self.nsig * sigma;
            // Compact the survivors to the front of the slice
            let mut kept = 0;
            for i in 0..n {
                if ((samples[i] as f64) - mean).abs() < limit {
                    samples.swap(kept, i);
                    kept += 1;
                }
            }
            if kept == 0 || kept == n {
                break;
            }
            n = kept;
            (mean, sigma) = mean_std(&samples[..n]);
        }

        ClipStats {
            mean,
            sigma,
            err: sigma / (n as f64).sqrt(),
            nkept: n,
        }
    }
}

/// Mean and population standard deviation, accumulated in f64.
fn mean_std(samples: &[f32]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}
