//! The cluster service registry the throttler relies on.
//!
//! Peers find each other through the [`Coordinator`]: every pool registers
//! an anonymous service under its group's [`ServiceType`] and, on each poll,
//! asks how many services of that type are alive. That count is the divisor
//! of the fair share.

mod memory;

use async_trait::async_trait;
use std::fmt;

pub use memory::MemoryCoordinator;

use crate::{CoordinationError, ServiceType};

/// Opaque identity of one registered service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle(String);

impl ServiceHandle {
    /// Wrap a handle issued by a coordinator
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get the handle as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service registration and discovery shared by all cluster members.
///
/// Implementations are expected to talk to something slow (a lock manager,
/// `ZooKeeper`, a database). The throttler never calls them while holding a
/// pool lock.
#[async_trait]
pub trait Coordinator: Send + Sync + fmt::Debug {
    /// Register this process as an anonymous instance of `service_type`
    /// and mark it active.
    async fn register_anonymous_service(
        &self,
        service_type: &ServiceType,
    ) -> Result<ServiceHandle, CoordinationError>;

    /// Deregister a service obtained from
    /// [`Coordinator::register_anonymous_service`].
    async fn end_service_activity(
        &self,
        service_type: &ServiceType,
        service: &ServiceHandle,
    ) -> Result<(), CoordinationError>;

    /// Count the live instances of `service_type` across the cluster,
    /// including this one.
    async fn count_active_services(
        &self,
        service_type: &ServiceType,
    ) -> Result<usize, CoordinationError>;
}
