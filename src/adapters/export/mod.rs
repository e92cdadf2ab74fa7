//! Report export. CSV files operators can open in a spreadsheet.

pub mod csv_report;

pub use csv_report::{audience_to_csv, drift_to_csv, failures_to_csv, write_report};
