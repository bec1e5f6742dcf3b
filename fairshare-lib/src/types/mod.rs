mod bin_name;
mod error;
mod group;

pub use bin_name::{BinName, BinSet};
pub use error::{CoordinationError, Result, ThrottleError};
pub use group::{ServiceType, ThrottleGroup};
