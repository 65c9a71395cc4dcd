use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::source::Source;

/// Read a pixel-space source list from a headered CSV file.
///
/// Columns are positional: `id,row,col,mag`. Extra trailing columns are ignored.
/// Every source starts with an unmeasured mask radius.
pub fn read_source_csv<P: AsRef<Path>>(file: P) -> Result<Vec<Source>> {
    let path = file.as_ref();
    let rdr = ::csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open source catalog: {}", path.display()))?;
    read_sources(rdr)
}

pub(crate) fn read_sources<R: std::io::Read>(mut rdr: ::csv::Reader<R>) -> Result<Vec<Source>> {
    rdr.records()
        .enumerate()
        .map(|(idx, result)| -> Result<Source> {
            let record = result?;
            // Header is line 1
            let line = idx + 2;
            let id: u64 = field(&record, 0, "id", line)?
                .parse()
                .with_context(|| format!("line {}: bad id", line))?;
            let row: f64 = field(&record, 1, "row", line)?
                .parse()
                .with_context(|| format!("line {}: bad row", line))?;
            let col: f64 = field(&record, 2, "col", line)?
                .parse()
                .with_context(|| format!("line {}: bad col", line))?;
            let mag: f64 = field(&record, 3, "mag", line)?
                .parse()
                .with_context(|| format!("line {}: bad mag", line))?;
            Ok(Source::new(id, row, col, mag))
        })
        .collect()
}

fn field<'a>(record: &'a ::csv::StringRecord, i: usize, name: &str, line: usize) -> Result<&'a str> {
    record
        .get(i)
        .map(str::trim)
        .ok_or_else(|| anyhow!("line {}: missing column '{}'", line, name))
}
