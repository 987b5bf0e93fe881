//! Output formatters for run results
//!
//! Provides JSON and one-line summary output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::models::{ContextResult, RunResult};

/// Topics slower than this many seconds are listed in summaries
const SLOW_TOPIC_THRESHOLD: f64 = 0.1;
const SLOW_TOPIC_COUNT: usize = 5;

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Json,
    JsonPretty,
    #[default]
    Summary,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonPretty => write!(f, "json-pretty"),
            OutputFormat::Summary => write!(f, "summary"),
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format a whole run
    pub fn format_run(&self, run: &RunResult) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(run),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(run),
            OutputFormat::Summary => Ok(self.format_summary(run)),
        }
    }

    /// Failing vows, context errors, slow topics and the totals line
    fn format_summary(&self, run: &RunResult) -> String {
        let mut output = String::new();

        for context in run.all_contexts() {
            if let Some(error) = &context.error {
                output.push_str(&format!("! {} - {}\n", context.id, error));
            }
            for vow in context.tests.iter().filter(|vow| vow.is_errored()) {
                output.push_str(&format!("{vow}\n"));
            }
        }

        let slow = run.get_worst_topics(SLOW_TOPIC_COUNT, SLOW_TOPIC_THRESHOLD);
        if !slow.is_empty() {
            output.push_str("Slowest topics:\n");
            for context in slow {
                output.push_str(&self.format_slow_topic(context));
            }
        }

        output.push_str(&run.to_string());
        output
    }

    fn format_slow_topic(&self, context: &ContextResult) -> String {
        format!("  {:>8.3}s {}\n", context.topic_elapsed, context.id)
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Summary)
    }
}

/// Write results to a file
pub fn write_results_to_file(
    path: &str,
    run: &RunResult,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let content = ResultFormatter::new(format).format_run(run)?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorRecord, VowResult, VowStatus};
    use chrono::Utc;

    fn vow(name: &str, error: Option<ErrorRecord>) -> VowResult {
        VowResult {
            name: name.to_string(),
            context: "Root".to_string(),
            enumerated: false,
            index: None,
            topic: Some("42".to_string()),
            result: if error.is_some() { VowStatus::Fail } else { VowStatus::Pass },
            succeeded: error.is_none(),
            error,
            file: "suite.rs".to_string(),
            lineno: 3,
            elapsed: 0.001,
            skip: None,
        }
    }

    fn run() -> RunResult {
        let root = ContextResult {
            name: "Root".to_string(),
            id: "Root".to_string(),
            filename: "suite.rs".to_string(),
            tests: vec![
                vow("passes", None),
                vow("fails", Some(ErrorRecord::new("AssertionError", "42 != 43"))),
            ],
            contexts: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            topic_elapsed: 0.5,
            error: None,
            skip: None,
        };
        RunResult::new(vec![root], 0.6, Utc::now())
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse(), Ok(OutputFormat::Json));
        assert_eq!("JSON-PRETTY".parse(), Ok(OutputFormat::JsonPretty));
        assert!("table".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::JsonPretty.to_string(), "json-pretty");
    }

    #[test]
    fn test_json_uses_boundary_field_names() {
        let json = ResultFormatter::new(OutputFormat::Json)
            .format_run(&run())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let context = &value["contexts"][0];
        assert_eq!(context["name"], "Root");
        assert_eq!(context["topic_elapsed"], 0.5);
        assert_eq!(context["tests"][1]["error"]["type"], "AssertionError");
        assert_eq!(context["tests"][1]["succeeded"], false);
        assert_eq!(context["tests"][0]["lineno"], 3);
    }

    #[test]
    fn test_summary_lists_failures_and_slow_topics() {
        let run = run();
        let output = ResultFormatter::default().format_run(&run).unwrap();
        assert!(output.contains("Root.fails"));
        assert!(!output.contains("Root.passes"));
        assert!(output.contains("Slowest topics:"));
        assert!(output.ends_with(&run.to_string()));
        assert!(output.contains("FAILED"));
    }

    #[test]
    fn test_write_results_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        write_results_to_file(path.to_str().unwrap(), &run(), OutputFormat::JsonPretty).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: RunResult = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.total_test_count(), 2);
    }
}
