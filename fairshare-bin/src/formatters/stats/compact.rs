use anyhow::Result;
use std::fmt::{self, Display};

use crate::formatters::color::{BOLD, DIM, NORMAL, PINK, color};
use crate::simulate::Report;

use super::StatsFormatter;

struct CompactReport<'a>(&'a Report);

impl Display for CompactReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let separator = "─".repeat(60);

        for (index, peer) in report.peers.iter().enumerate() {
            color!(
                f,
                BOLD,
                "Peer {} │ {} fetches",
                index + 1,
                peer.fetches
            )?;
            if peer.failures > 0 {
                color!(f, PINK, " │ {} failed workers", peer.failures)?;
            }
            writeln!(f)?;
            color!(f, DIM, "{}", separator)?;
            writeln!(f)?;

            for (group, pool) in &peer.groups {
                color!(f, NORMAL, "{} ({} peers)", group, pool.peers)?;
                writeln!(f)?;

                let busiest = pool.busiest();
                let width = busiest
                    .iter()
                    .map(|(bin, _)| bin.as_str().len())
                    .max()
                    .unwrap_or(0)
                    .max(8);
                for (bin, stats) in busiest {
                    color!(f, NORMAL, "  {:<width$} │ {}", bin.as_str(), stats.summary(), width = width)?;
                    writeln!(f)?;
                }
            }
            writeln!(f)?;
        }

        write!(
            f,
            "Simulated {} peers in {}ms",
            report.peers.len(),
            report.elapsed.as_millis()
        )
    }
}

pub(crate) struct Compact;

impl Compact {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl StatsFormatter for Compact {
    fn format(&self, report: &Report) -> Result<String> {
        Ok(CompactReport(report).to_string())
    }
}
