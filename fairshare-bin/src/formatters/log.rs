use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

use crate::{formatters::color::color_for_level, verbosity::Verbosity};

/// Initialize the logging system with the given verbosity level.
///
/// `RUST_LOG` takes precedence over the command-line flags when it is set.
pub(crate) fn init_logging(verbose: &Verbosity, colored: bool) {
    // It will be overridden by RUST_LOG if it's set.
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);

    if std::env::var("RUST_LOG").is_err() {
        let level_filter = verbose.log_level_filter();

        // Keep other crates quiet; the flags only apply to our own
        builder.filter_level(LevelFilter::Warn);
        builder
            .filter_module("fairshare", level_filter)
            .filter_module("fairshare_lib", level_filter);
    }

    if colored {
        builder.format(move |buf, record| {
            let level = record.level();
            let color = color_for_level(level);
            writeln!(
                buf,
                "{} {}",
                color.apply_to(format!("[{level}]")),
                record.args()
            )
        });
    } else {
        builder.format(move |buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));
    }

    builder.init();
}
