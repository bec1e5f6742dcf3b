pub(crate) mod color;
pub(crate) mod log;
pub(crate) mod stats;

use self::stats::StatsFormatter;
use crate::options::StatsFormat;
use supports_color::Stream;

/// Detects whether a terminal supports color, and gives details about that
/// support. It takes into account the `NO_COLOR` environment variable.
pub(crate) fn supports_color() -> bool {
    supports_color::on(Stream::Stderr).is_some()
}

pub(crate) fn get_stats_formatter(format: StatsFormat) -> Box<dyn StatsFormatter> {
    match format {
        StatsFormat::Compact => Box::new(stats::Compact::new()),
        StatsFormat::Json => Box::new(stats::Json::new()),
    }
}
