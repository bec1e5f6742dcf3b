mod compact;
mod json;

pub(crate) use compact::Compact;
pub(crate) use json::Json;

use anyhow::Result;

use crate::simulate::Report;

/// Trait for formatting the final simulation report in different output
/// formats
pub(crate) trait StatsFormatter {
    /// Format the report and return it as a string
    fn format(&self, report: &Report) -> Result<String>;
}
