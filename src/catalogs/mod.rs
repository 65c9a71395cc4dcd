/// Pixel-space source catalogs stored as CSV
pub mod csv;
