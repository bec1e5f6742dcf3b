use anyhow::{Context, Result};

use super::StatsFormatter;
use crate::simulate::Report;

pub(crate) struct Json;

impl Json {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl StatsFormatter for Json {
    /// Format the report as a pretty-printed JSON object
    fn format(&self, report: &Report) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format simulation report as JSON")
    }
}
