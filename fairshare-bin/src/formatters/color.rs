//! Defines the colors used in the output of the CLI.

use console::Style;
use log::Level;
use once_cell::sync::Lazy;

pub(crate) static NORMAL: Lazy<Style> = Lazy::new(Style::new);
pub(crate) static DIM: Lazy<Style> = Lazy::new(|| Style::new().dim());
pub(crate) static BOLD: Lazy<Style> = Lazy::new(|| Style::new().bold());

pub(crate) static GREEN: Lazy<Style> = Lazy::new(|| Style::new().color256(2).bold().bright());
pub(crate) static YELLOW: Lazy<Style> = Lazy::new(|| Style::new().yellow().bright());
pub(crate) static PINK: Lazy<Style> = Lazy::new(|| Style::new().color256(197));

// Used for debug log messages
pub(crate) static BLUE: Lazy<Style> = Lazy::new(|| Style::new().blue().bright());

/// The style of a log level label
pub(crate) fn color_for_level(level: Level) -> &'static Style {
    match level {
        Level::Error => &PINK,
        Level::Warn => &YELLOW,
        Level::Info => &GREEN,
        Level::Debug => &BLUE,
        Level::Trace => &DIM,
    }
}

// Write output using predefined colors
macro_rules! color {
    ($f:ident, $color:ident, $text:tt, $($tts:tt)*) => {
        write!($f, "{}", $color.apply_to(format!($text, $($tts)*)))
    };
}

pub(crate) use color;
