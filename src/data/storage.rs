//! CSV output of measurement records.
//!
//! One header line, then one line per record, flushed immediately so an
//! interrupted acquisition keeps every sample already received.
//!
//! Columns: optional `date`, `count`, battery voltages, currents, then for each
//! channel `n` its potentials and resistivities suffixed with `(chn)`.
//! Batteries are written with one decimal, other physical values with six,
//! undefined resistivities as `NaN`.
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, DaqError};
use crate::measurement::{MeasureRecord, RecordSink};

/// Name of the optional timestamp column.
pub const DATE_FIELD: &str = "date";

const COMMON_FIELDS: [&str; 5] = [
    "count",
    "rec. batt. voltage(V)",
    "em. batt. voltage(V)",
    "phase current(mA)",
    "quad. current(mA)",
];

/// CSV layout options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    /// Field delimiter
    pub delimiter: u8,
    /// Prepend the UTC reception time
    pub datetime: bool,
    /// Also print lines on stdout when writing to a file
    pub stdout_display: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            datetime: false,
            stdout_display: false,
        }
    }
}

/// Column names for `channels` channels.
pub fn csv_header(channels: usize, datetime: bool) -> Vec<String> {
    let mut fields = Vec::with_capacity(6 + 4 * channels);
    if datetime {
        fields.push(DATE_FIELD.to_string());
    }
    fields.extend(COMMON_FIELDS.iter().map(|f| f.to_string()));
    for n in 0..channels {
        fields.push(format!("phase potential(mV) (ch{})", n));
        fields.push(format!("quad. potential(mV) (ch{})", n));
        fields.push(format!("phase resistivity(kOhm.m) (ch{})", n));
        fields.push(format!("quad. resistivity(kOhm.m) (ch{})", n));
    }
    fields
}

fn fixed6(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.6}", value)
    }
}

/// Field values of one record, in header order.
pub fn csv_row(record: &MeasureRecord, datetime: bool) -> Vec<String> {
    let mut row = Vec::with_capacity(6 + 4 * record.channels.len());
    if datetime {
        row.push(record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    }
    row.push(record.count.to_string());
    row.push(format!("{:.1}", record.rec_battery_v));
    row.push(format!("{:.1}", record.em_battery_v));
    row.push(fixed6(record.phase_current_ma));
    row.push(fixed6(record.quad_current_ma));
    for ch in &record.channels {
        row.push(fixed6(ch.phase_potential_mv));
        row.push(fixed6(ch.quad_potential_mv));
        let (phase, quad) = ch
            .resistivity
            .map_or((f64::NAN, f64::NAN), |r| (r.phase, r.quad));
        row.push(fixed6(phase));
        row.push(fixed6(quad));
    }
    row
}

/// A writer for CSV files.
#[cfg(feature = "storage_csv")]
pub struct CsvWriter {
    path: Option<PathBuf>,
    writer: csv::Writer<Box<dyn std::io::Write + Send>>,
    mirror: Option<csv::Writer<std::io::Stdout>>,
    datetime: bool,
    rows: u64,
}

#[cfg(feature = "storage_csv")]
impl CsvWriter {
    /// Write to `path`, or to stdout when `path` is `None`, and emit the header.
    pub fn create(path: Option<&Path>, options: &CsvOptions, channels: usize) -> AppResult<Self> {
        let target: Box<dyn std::io::Write + Send> = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| DaqError::Storage(format!("{}: {}", parent.display(), e)))?;
                }
                let file = std::fs::File::create(path)
                    .map_err(|e| DaqError::Storage(format!("Failed to create CSV file {}: {}", path.display(), e)))?;
                Box::new(std::io::BufWriter::new(file))
            }
            None => Box::new(std::io::stdout()),
        };

        let builder = || {
            let mut b = csv::WriterBuilder::new();
            b.delimiter(options.delimiter).has_headers(false);
            b
        };
        let mirror = (path.is_some() && options.stdout_display)
            .then(|| builder().from_writer(std::io::stdout()));

        let mut writer = Self {
            path: path.map(Path::to_path_buf),
            writer: builder().from_writer(target),
            mirror,
            datetime: options.datetime,
            rows: 0,
        };
        writer.write_line(&csv_header(channels, options.datetime))?;
        match &writer.path {
            Some(p) => log::info!("CSV Writer initialized at '{}'.", p.display()),
            None => log::info!("CSV Writer initialized on standard output."),
        }
        Ok(writer)
    }

    /// Records written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn write_line(&mut self, fields: &[String]) -> AppResult<()> {
        self.writer
            .write_record(fields)
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        if let Some(mirror) = self.mirror.as_mut() {
            mirror
                .write_record(fields)
                .and_then(|_| mirror.flush().map_err(csv::Error::from))
                .map_err(|e| DaqError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(feature = "storage_csv")]
#[async_trait]
impl RecordSink for CsvWriter {
    async fn emit(&mut self, record: MeasureRecord) -> AppResult<()> {
        let row = csv_row(&record, self.datetime);
        self.write_line(&row)?;
        self.rows += 1;
        Ok(())
    }

    async fn finish(&mut self) -> AppResult<()> {
        self.writer
            .flush()
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        log::info!("CSV Writer shut down after {} record(s).", self.rows);
        Ok(())
    }
}

/// CSV output placeholder when the `storage_csv` feature is disabled.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvWriter;

#[cfg(not(feature = "storage_csv"))]
impl CsvWriter {
    /// Always fails with [`DaqError::FeatureNotEnabled`].
    pub fn create(_path: Option<&Path>, _options: &CsvOptions, _channels: usize) -> AppResult<Self> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(not(feature = "storage_csv"))]
#[async_trait]
impl RecordSink for CsvWriter {
    async fn emit(&mut self, _record: MeasureRecord) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::value_codec::Resistivity;
    use crate::measurement::ChannelRecord;
    use chrono::{TimeZone, Utc};

    fn record() -> MeasureRecord {
        MeasureRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap(),
            count: 42,
            rec_battery_v: 12.46,
            em_battery_v: 11.99,
            phase_current_ma: 0.5,
            quad_current_ma: -0.25,
            channels: vec![
                ChannelRecord {
                    phase_potential_mv: 1.25,
                    quad_potential_mv: 0.0,
                    resistivity: Some(Resistivity {
                        phase: 2000.0,
                        quad: 1000.0,
                    }),
                },
                ChannelRecord {
                    phase_potential_mv: 0.0,
                    quad_potential_mv: 0.0,
                    resistivity: None,
                },
            ],
        }
    }

    #[test]
    fn header_lists_channel_columns() {
        let header = csv_header(2, true);
        assert_eq!(header[0], "date");
        assert_eq!(header[1], "count");
        assert_eq!(header.len(), 1 + 5 + 8);
        assert_eq!(header[6], "phase potential(mV) (ch0)");
        assert_eq!(header[13], "quad. resistivity(kOhm.m) (ch1)");
    }

    #[test]
    fn row_formats_values() {
        let row = csv_row(&record(), false);
        assert_eq!(
            row,
            vec![
                "42", "12.5", "12.0", "0.500000", "-0.250000", "1.250000", "0.000000",
                "2000.000000", "1000.000000", "0.000000", "0.000000", "NaN", "NaN",
            ]
        );
        let dated = csv_row(&record(), true);
        assert_eq!(dated[0], "2024-05-17 09:30:00.000000");
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn writes_file_with_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("acq.csv");
        let options = CsvOptions {
            delimiter: b',',
            ..Default::default()
        };
        let mut writer = CsvWriter::create(Some(&path), &options, 2).unwrap();
        writer.emit(record()).await.unwrap();
        writer.emit(record()).await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(writer.rows(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("count,rec. batt. voltage(V),"));
        assert!(lines[1].starts_with("42,12.5,12.0,0.500000,"));
        assert!(lines[1].ends_with(",NaN,NaN"));
    }
}
