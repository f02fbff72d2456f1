//! Flat CSV export of match results, one row per aggregated fulfillment group.

use std::io::Write;
use std::path::Path;

use shipmatch_recon::MatchResult;

/// Write results with a header row. Enum columns use their wire names
/// (`EXACT`, `Alt_PO`, `GOOD`, ...); absent values are empty cells.
pub fn write_results<W: Write>(writer: W, results: &[MatchResult]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in results {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_results_file(path: &Path, results: &[MatchResult]) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_results(std::io::BufWriter::new(file), results)
}
