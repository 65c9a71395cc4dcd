/// Value of [`Source::mask_radius`] for a star that has not been measured.
pub const MASK_RADIUS_SENTINEL: f64 = -9999.0;

/// A point source to be measured.
///
/// Position is in continuous pixel coordinates of the image grid: `row` indexes
/// the first (slow) axis, `col` the second. Conversion from sky coordinates is
/// done before the star reaches this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: u64,
    pub row: f64,
    pub col: f64,
    /// Catalog magnitude; only used to decide faint-star subsampling.
    pub mag: f64,
    /// Estimated mask radius in pixels, or [`MASK_RADIUS_SENTINEL`].
    pub mask_radius: f64,
}

impl Source {
    pub fn new(id: u64, row: f64, col: f64, mag: f64) -> Self {
        Self {
            id,
            row,
            col,
            mag,
            mask_radius: MASK_RADIUS_SENTINEL,
        }
    }

    /// `true` once a mask radius has been stored.
    pub fn is_measured(&self) -> bool {
        self.mask_radius != MASK_RADIUS_SENTINEL
    }
}
