use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::coordinator::{Coordinator, ServiceHandle};
use crate::{CoordinationError, MemoryCoordinator, ServiceType, ThrottleGroup};

/// Register `count` extra cluster members for `group`
pub(crate) async fn add_peers(
    coordinator: &MemoryCoordinator,
    group: &ThrottleGroup,
    count: usize,
) -> Vec<ServiceHandle> {
    let service_type = group.service_type();
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        handles.push(
            coordinator
                .register_anonymous_service(&service_type)
                .await
                .unwrap(),
        );
    }
    handles
}

/// A [`MemoryCoordinator`] whose peer counts can be inflated or made to fail
/// independently of registration. Registration yields to the scheduler
/// first, so that concurrent registrations interleave, and can be held
/// back entirely with [`FlakyCoordinator::hold_registrations`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyCoordinator {
    inner: MemoryCoordinator,
    peers: Arc<AtomicUsize>,
    fail_counts: Arc<AtomicBool>,
    registrations: Arc<RwLock<()>>,
}

impl FlakyCoordinator {
    /// Report at least `peers` members from now on
    pub(crate) fn set_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::SeqCst);
    }

    /// Make peer counting fail (`true`) or succeed (`false`)
    pub(crate) fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    /// Block every registration until the returned guard is dropped
    pub(crate) async fn hold_registrations(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.registrations).write_owned().await
    }

    pub(crate) fn registered(&self, service_type: &ServiceType) -> usize {
        self.inner.registered(service_type)
    }
}

#[async_trait]
impl Coordinator for FlakyCoordinator {
    async fn register_anonymous_service(
        &self,
        service_type: &ServiceType,
    ) -> Result<ServiceHandle, CoordinationError> {
        tokio::task::yield_now().await;
        let _open = self.registrations.read().await;
        self.inner.register_anonymous_service(service_type).await
    }

    async fn end_service_activity(
        &self,
        service_type: &ServiceType,
        service: &ServiceHandle,
    ) -> Result<(), CoordinationError> {
        self.inner.end_service_activity(service_type, service).await
    }

    async fn count_active_services(
        &self,
        service_type: &ServiceType,
    ) -> Result<usize, CoordinationError> {
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unreachable(
                "peer count unavailable".to_string(),
            ));
        }
        let registered = self.inner.count_active_services(service_type).await?;
        Ok(registered.max(self.peers.load(Ordering::SeqCst)))
    }
}
