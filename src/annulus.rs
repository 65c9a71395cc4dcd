//! Collect the usable pixels of one source inside a circular annulus.
//!
//! A pixel at integer position `(r, c)` is sampled when
//!
//! 1. its squared distance to the (continuous) center lies in `[rmin2, rmax2]`,
//!    both ends inclusive,
//! 2. its segmentation label is 0 or the source's own label,
//! 3. it is not masked, its weight is positive and its intensity is finite.
//!
//! Only the box of rows and columns that can reach `rmax2` is scanned; the pixel
//! set is the same as a scan over the full image.

use anyhow::{bail, Result};

use crate::grid::ImageStack;

/// Fill `out` with the usable pixel values of the annulus around `(row, col)`
/// and return how many were written.
///
/// Values are written in scan order (row-major within the bounding box).
/// `segval` is the segmentation label owned by the current source; pixels with
/// any other nonzero label belong to a neighbour and are skipped.
///
/// # Errors
///
/// Fails if more pixels match than `out` can hold. A buffer of
/// [`ImageStack::npix`] values can never overflow, so this signals a sizing bug
/// in the caller.
pub fn sample_annulus(
    stack: &ImageStack,
    row: f64,
    col: f64,
    rmin2: f64,
    rmax2: f64,
    segval: i32,
    out: &mut [f32],
) -> Result<usize> {
    let nrows = stack.nrows();
    let ncols = stack.ncols();
    if rmax2 < rmin2 || rmax2 < 0.0 || nrows == 0 || ncols == 0 {
        return Ok(0);
    }

    // ── Bounding box ──
    // Any pixel with dist2 <= rmax2 is within rmax of the center along each
    // axis. Pad by one pixel so sqrt rounding can never drop an edge pixel.
    let rmax = rmax2.sqrt();
    let (row_lo, row_hi) = match axis_range(row, rmax, nrows) {
        Some(range) => range,
        None => return Ok(0),
    };
    let (col_lo, col_hi) = match axis_range(col, rmax, ncols) {
        Some(range) => range,
        None => return Ok(0),
    };

    let image = &stack.image;
    let mask = &stack.mask;
    let weight = &stack.weight;
    let seg = &stack.seg;

    let mut count = 0usize;
    for r in row_lo..=row_hi {
        let dr = r as f64 - row;
        let dr2 = dr * dr;
        if dr2 > rmax2 {
            continue;
        }
        for c in col_lo..=col_hi {
            let dc = c as f64 - col;
            let dist2 = dr2 + dc * dc;
            if dist2 < rmin2 || dist2 > rmax2 {
                continue;
            }

            let label = seg[(r, c)];
            if label != 0 && label != segval {
                continue;
            }
            if mask[(r, c)] != 0 || !(weight[(r, c)] > 0.0) {
                continue;
            }
            let value = image[(r, c)];
            if !value.is_finite() {
                continue;
            }

            if count >= out.len() {
                bail!(
                    "Annulus sample overflow: more than {} pixels around ({:.2}, {:.2})",
                    out.len(),
                    row,
                    col
                );
            }
            out[count] = value;
            count += 1;
        }
    }

    Ok(count)
}

/// Inclusive index range along one axis covering `[center - radius, center + radius]`,
/// padded by one pixel and clipped to `[0, len - 1]`. `None` when the range
/// misses the axis entirely.
fn axis_range(center: f64, radius: f64, len: usize) -> Option<(usize, usize)> {
    let lo = (center - radius).floor() - 1.0;
    let hi = (center + radius).ceil() + 1.0;
    let max = (len - 1) as f64;
    // An infinite radius covers the whole axis; only a NaN bound is unusable
    if lo.is_nan() || hi.is_nan() || hi < 0.0 || lo > max {
        return None;
    }
    Some((lo.max(0.0) as usize, hi.min(max) as usize))
}
