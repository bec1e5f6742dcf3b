use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{Coordinator, ServiceHandle};
use crate::{CoordinationError, ServiceType};

/// An in-process [`Coordinator`].
///
/// Clones share the same registry, so handing a clone to each of several
/// [`crate::Throttler`]s models a cluster whose members all see each other.
/// The registry can be made unreachable to exercise failure handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    inner: Arc<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    services: DashMap<ServiceType, HashSet<ServiceHandle>>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
}

impl MemoryCoordinator {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call succeed (`true`) or fail with
    /// [`CoordinationError::Unreachable`] (`false`)
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Number of services currently registered under `service_type`,
    /// regardless of reachability
    #[must_use]
    pub fn registered(&self, service_type: &ServiceType) -> usize {
        self.inner
            .services
            .get(service_type)
            .map_or(0, |services| services.len())
    }

    fn check_reachable(&self) -> Result<(), CoordinationError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            Err(CoordinationError::Unreachable(
                "in-memory registry is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn register_anonymous_service(
        &self,
        service_type: &ServiceType,
    ) -> Result<ServiceHandle, CoordinationError> {
        self.check_reachable()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ServiceHandle::new(format!("anonymous-{id}"));
        self.inner
            .services
            .entry(service_type.clone())
            .or_default()
            .insert(handle.clone());
        Ok(handle)
    }

    async fn end_service_activity(
        &self,
        service_type: &ServiceType,
        service: &ServiceHandle,
    ) -> Result<(), CoordinationError> {
        self.check_reachable()?;
        let removed = self
            .inner
            .services
            .get_mut(service_type)
            .is_some_and(|mut services| services.remove(service));
        self.inner
            .services
            .remove_if(service_type, |_, services| services.is_empty());

        if removed {
            Ok(())
        } else {
            Err(CoordinationError::UnknownService {
                service_type: service_type.to_string(),
                service: service.to_string(),
            })
        }
    }

    async fn count_active_services(
        &self,
        service_type: &ServiceType,
    ) -> Result<usize, CoordinationError> {
        self.check_reachable()?;
        Ok(self.registered(service_type))
    }
}
