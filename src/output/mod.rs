//! Output formatting module
//!
//! Emits a [`RunResult`](crate::models::RunResult) for external reporters.

mod formatter;

pub use formatter::{write_results_to_file, OutputFormat, ResultFormatter};
