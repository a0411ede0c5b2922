//! CSV export of data frames.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use vibemon_core::{DataSink, Result};
use vibemon_types::DataFrame;

/// Appends one CSV row per data frame.
///
/// Channel magnitudes are joined with `;` inside one field so the column
/// count stays fixed across protocol revisions.
pub struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    /// Open `path` for appending, writing the header if the file is new.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let new_file = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if new_file {
            writeln!(writer, "timestamp,primary_rate,battery_percent,magnitudes")?;
        }
        Ok(Self { writer })
    }
}

#[async_trait]
impl DataSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn record_data(&mut self, frame: &DataFrame) -> Result<()> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let magnitudes = frame
            .channel_magnitudes
            .iter()
            .map(|m| format!("{:.4}", m))
            .collect::<Vec<_>>()
            .join(";");
        writeln!(
            self.writer,
            "{},{:.4},{},{}",
            timestamp, frame.primary_rate, frame.battery_percent, magnitudes
        )?;
        self.writer.flush()?;
        Ok(())
    }
}
