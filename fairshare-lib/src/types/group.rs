use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every cluster member, so that all peers throttling the
/// same group register under the same service type and can count each other.
const SERVICE_TYPE_PREFIX: &str = "_THROTTLEPOOL_";

/// The name of a throttle group.
///
/// A throttle group shares one [`crate::ThrottleSpec`] and one coordinator
/// service type across the cluster. Within a [`crate::Throttler`] there is at
/// most one live pool per group.
///
/// # Examples
///
/// ```
/// use fairshare_lib::ThrottleGroup;
///
/// let group = ThrottleGroup::from("crawler");
/// assert_eq!(group.service_type().as_str(), "_THROTTLEPOOL_crawler");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThrottleGroup(String);

impl ThrottleGroup {
    /// Get the group name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The coordinator service type all peers of this group register under
    #[must_use]
    pub fn service_type(&self) -> ServiceType {
        ServiceType(format!("{SERVICE_TYPE_PREFIX}{}", self.0))
    }
}

impl fmt::Display for ThrottleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ThrottleGroup {
    fn from(name: String) -> Self {
        ThrottleGroup(name)
    }
}

impl From<&str> for ThrottleGroup {
    fn from(name: &str) -> Self {
        ThrottleGroup(name.to_string())
    }
}

/// Coordinator service type derived from a [`ThrottleGroup`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType(String);

impl ServiceType {
    /// Get the service type as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&ThrottleGroup> for ServiceType {
    fn from(group: &ThrottleGroup) -> Self {
        group.service_type()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
