//! Data storage.
pub mod storage;

pub use storage::{csv_header, csv_row, CsvOptions, CsvWriter};
