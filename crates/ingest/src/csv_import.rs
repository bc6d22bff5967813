use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::info;
use voltwatch_core::Frame;

use crate::error::IngestResult;
use crate::{typed_column, ImportOptions};

pub struct CsvImporter;

impl CsvImporter {
    pub fn import(path: &Path, opts: &ImportOptions) -> IngestResult<Frame> {
        let file = File::open(path)?;
        let frame = Self::read(BufReader::new(file), opts)?;
        info!(
            rows = frame.rows(),
            columns = frame.width(),
            "Imported {}",
            path.display()
        );
        Ok(frame)
    }

    /// Parse CSV with a header row. Header names are trimmed; short records
    /// are padded with missing cells.
    pub fn read<R: Read>(reader: R, opts: &ImportOptions) -> IngestResult<Frame> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, col) in cells.iter_mut().enumerate() {
                col.push(record.get(i).map(str::to_string));
            }
        }

        let columns = headers
            .iter()
            .zip(cells)
            .map(|(name, raw)| typed_column(name, raw, opts))
            .collect::<IngestResult<Vec<_>>>()?;
        Ok(Frame::from_columns(columns)?)
    }
}
