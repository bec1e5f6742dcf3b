use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow, bail};
use clap::Parser;
use const_format::{concatcp, formatcp};
use fairshare_lib::{BinName, ThrottleGroup, ThrottleSpec, ThrottlerConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, str::FromStr, time::Duration};
use strum::Display;

pub(crate) const FAIRSHARE_CONFIG_FILE: &str = "fairshare.toml";

const DEFAULT_PEERS: usize = 3;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_TRANSFER_SIZE: u64 = 16 * 1024;

// clap requires `&str` type values for defaults in help texts
const PEERS_STR: &str = concatcp!(DEFAULT_PEERS);
const WORKERS_STR: &str = concatcp!(DEFAULT_WORKERS);
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    FAIRSHARE_CONFIG_FILE,
);

/// The format to use for the final statistics report
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, PartialEq, Eq)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum StatsFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for StatsFormat {
    type Err = Error;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "compact" | "string" => Ok(StatsFormat::Compact),
            "json" => Ok(StatsFormat::Json),
            _ => Err(anyhow!("Unknown format {format}")),
        }
    }
}

/// One throttle group of the simulation and the traffic sent through it
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct GroupConfig {
    /// Cluster-wide limits of the group
    pub(crate) spec: ThrottleSpec,

    /// Bins the workers fetch from, one bin per fetch in round-robin order
    pub(crate) targets: Vec<BinName>,

    /// Bytes moved by a single fetch
    #[serde(default = "default_transfer_size")]
    pub(crate) transfer_size: u64,
}

const fn default_transfer_size() -> u64 {
    DEFAULT_TRANSFER_SIZE
}

/// Simulate a cluster of peers that share throttle groups.
///
/// Every peer runs its own throttler against one shared in-process
/// coordinator. Worker tasks on each peer fetch from the configured bins
/// until the simulation ends, then the per-bin statistics of every peer are
/// printed.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct FairshareOptions {
    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

/// The main configuration for the simulation
#[derive(Parser, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default)]
    pub(crate) verbose: Verbosity,

    /// Number of simulated cluster members
    #[arg(long, help = formatcp!("Number of simulated cluster members [default: {}]", PEERS_STR))]
    #[serde(default)]
    pub(crate) peers: Option<usize>,

    /// Worker tasks per member and group
    #[arg(
        short,
        long,
        help = formatcp!("Worker tasks per member and group [default: {}]", WORKERS_STR)
    )]
    #[serde(default)]
    pub(crate) workers: Option<usize>,

    /// How long the workers keep fetching, e.g. `500ms` or `2s`
    #[arg(short, long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) duration: Option<Duration>,

    /// Interval between two rebalancing passes, e.g. `250ms`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) poll_interval: Option<Duration>,

    /// Output format of the final statistics report: `compact` (default) or `json`
    #[arg(short, long)]
    #[serde(default)]
    pub(crate) format: Option<StatsFormat>,

    /// Throttler settings; only available in the configuration file
    #[arg(skip)]
    #[serde(default)]
    pub(crate) throttler: ThrottlerConfig,

    /// Throttle groups; only available in the configuration file
    #[arg(skip)]
    #[serde(default)]
    pub(crate) groups: BTreeMap<ThrottleGroup, GroupConfig>,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration.
    /// Values given on the command line win.
    pub(crate) fn merge(&mut self, toml: Config) {
        if self.verbose == Verbosity::default() {
            self.verbose = toml.verbose;
        }
        self.peers = self.peers.or(toml.peers);
        self.workers = self.workers.or(toml.workers);
        self.duration = self.duration.or(toml.duration);
        self.poll_interval = self.poll_interval.or(toml.poll_interval);
        self.format = self.format.or(toml.format);

        // Groups and throttler settings only exist in TOML
        self.throttler = toml.throttler;
        self.groups = toml.groups;
    }

    /// Reject configurations that cannot be simulated
    pub(crate) fn validate(&self) -> Result<()> {
        if self.peers() == 0 {
            bail!("`peers` must be positive");
        }
        if self.workers() == 0 {
            bail!("`workers` must be positive");
        }
        if self.groups.is_empty() {
            bail!("No throttle groups configured; add a `[groups.<name>]` table");
        }
        for (group, config) in &self.groups {
            config
                .spec
                .validate()
                .with_context(|| format!("Invalid spec for group `{group}`"))?;
            if config.targets.is_empty() {
                bail!("Group `{group}` has no targets");
            }
        }
        Ok(())
    }

    pub(crate) fn peers(&self) -> usize {
        self.peers.unwrap_or(DEFAULT_PEERS)
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS)
    }

    pub(crate) fn duration(&self) -> Duration {
        self.duration.unwrap_or(DEFAULT_DURATION)
    }

    pub(crate) fn format(&self) -> StatsFormat {
        self.format.unwrap_or_default()
    }

    /// The throttler settings with the command-line poll interval applied
    pub(crate) fn throttler_config(&self) -> ThrottlerConfig {
        let mut config = self.throttler;
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval = poll_interval;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = r#"
        peers = 2
        duration = "300ms"
        verbose = "info"

        [throttler]
        poll_interval = "100ms"

        [groups.crawl]
        targets = ["mirror-a", "mirror-b"]
        transfer_size = 4096

        [groups.crawl.spec]
        max_connections = 4
        max_bytes_per_second = 65536
        min_fetch_interval = "10ms"
    "#;

    #[test]
    fn test_parse_example_config() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.peers(), 2);
        assert_eq!(config.workers(), DEFAULT_WORKERS);
        assert_eq!(config.duration(), Duration::from_millis(300));
        assert_eq!(config.throttler.poll_interval, Duration::from_millis(100));

        let crawl = &config.groups[&ThrottleGroup::from("crawl")];
        assert_eq!(crawl.targets, vec![BinName::from("mirror-a"), BinName::from("mirror-b")]);
        assert_eq!(crawl.transfer_size, 4096);
        assert_eq!(crawl.spec.min_fetch_interval, Some(Duration::from_millis(10)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_wins_over_file() {
        let mut cli = Config {
            peers: Some(5),
            poll_interval: Some(Duration::from_millis(20)),
            ..Config::default()
        };
        cli.merge(toml::from_str(EXAMPLE).unwrap());

        assert_eq!(cli.peers(), 5);
        assert_eq!(cli.duration(), Duration::from_millis(300));
        assert_eq!(cli.throttler_config().poll_interval, Duration::from_millis(20));
        assert_eq!(cli.verbose.log_level(), log::Level::Info);
        assert_eq!(cli.groups.len(), 1);
    }

    #[test]
    fn test_transfer_size_default() {
        let group: GroupConfig = toml::from_str(
            r#"
            targets = ["a"]
            [spec]
            max_connections = 1
            max_bytes_per_second = 1
            "#,
        )
        .unwrap();
        assert_eq!(group.transfer_size, DEFAULT_TRANSFER_SIZE);
    }

    #[test]
    fn test_invalid_spec_is_reported() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config
            .groups
            .get_mut(&ThrottleGroup::from("crawl"))
            .unwrap()
            .spec
            .max_connections = 0;

        let error = config.validate().unwrap_err();
        assert_eq!(error.to_string(), "Invalid spec for group `crawl`");
        assert!(format!("{error:#}").contains("max_connections must be positive"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("threads = 4").is_err());
    }

    #[test]
    fn test_stats_format_from_str() {
        assert_eq!(StatsFormat::from_str("JSON").unwrap(), StatsFormat::Json);
        assert_eq!(StatsFormat::from_str("string").unwrap(), StatsFormat::Compact);
        assert!(StatsFormat::from_str("markdown").is_err());
    }
}
