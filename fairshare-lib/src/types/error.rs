use thiserror::Error;

use crate::ThrottleGroup;

/// Failures reported by a [`crate::Coordinator`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoordinationError {
    /// The cluster service registry could not be reached
    #[error("Coordinator is unreachable: {0}")]
    Unreachable(String),

    /// The coordinator has no record of the given service
    #[error("Service `{service}` is not registered under `{service_type}`")]
    UnknownService {
        /// The service type that was queried
        service_type: String,
        /// The service handle that was not found
        service: String,
    },
}

/// Possible errors when obtaining, using or releasing throttle permits
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ThrottleError {
    /// The supplied throttle specification is invalid
    #[error("Invalid throttle specification: {reason}")]
    Configuration {
        /// What is wrong with the throttle spec
        reason: String,
    },

    /// The coordinator failed while a pool was being registered
    #[error("Coordination failed: {0}")]
    Coordination(#[from] CoordinationError),

    /// A caller broke the permit contract, e.g. by releasing a permit that
    /// was never obtained
    #[error("Permit contract violated in throttle group `{group}`: {reason}")]
    InvariantViolation {
        /// The throttle group the call was made against
        group: ThrottleGroup,
        /// Description of the violation
        reason: String,
    },

    /// The pool serving the throttle group has been destroyed
    #[error("Throttle group `{group}` has been shut down")]
    Shutdown {
        /// The throttle group that was shut down
        group: ThrottleGroup,
    },
}

impl ThrottleError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(group: &ThrottleGroup, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            group: group.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shutdown(group: &ThrottleGroup) -> Self {
        Self::Shutdown {
            group: group.clone(),
        }
    }

    /// Whether this error was caused by a pool or throttler shutting down
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }
}

/// The result type used throughout `fairshare_lib`
pub type Result<T> = std::result::Result<T, ThrottleError>;
