//! Shared coordinators per subscription
//!
//! Several views watching the same restaurant must not each open a socket
//! and a poller. The registry hands out one coordinator per subscription key
//! and forgets it once every holder has dropped it.

use crate::coordinator::ConnectionCoordinator;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tablesync_types::{AuthToken, SubscriptionKey, SyncResult, SyncedEntity};
use tracing::debug;

/// Creates an unstarted coordinator
pub type CoordinatorFactory<T> = Arc<dyn Fn() -> ConnectionCoordinator<T> + Send + Sync>;

/// One coordinator per `(T::CHANNEL, key)`
pub struct CoordinatorRegistry<T: SyncedEntity> {
    coordinators: DashMap<SubscriptionKey, Weak<ConnectionCoordinator<T>>>,
    factory: CoordinatorFactory<T>,
}

impl<T: SyncedEntity> CoordinatorRegistry<T> {
    /// Create an empty registry
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> ConnectionCoordinator<T> + Send + Sync + 'static,
    {
        Self {
            coordinators: DashMap::new(),
            factory: Arc::new(factory),
        }
    }

    /// Get the started coordinator for `key`, creating it if needed
    ///
    /// Disposed and auth-rejected coordinators are replaced.
    pub async fn acquire(
        &self,
        key: SubscriptionKey,
        token: AuthToken,
    ) -> SyncResult<Arc<ConnectionCoordinator<T>>> {
        let coordinator = {
            let mut entry = self.coordinators.entry(key.clone()).or_insert_with(Weak::new);
            let live = entry
                .upgrade()
                .filter(|c| !c.is_disposed() && !c.is_auth_rejected());
            match live {
                Some(existing) => existing,
                None => {
                    debug!("Creating {} coordinator for {}", T::CHANNEL, key);
                    let created = Arc::new((self.factory)());
                    *entry = Arc::downgrade(&created);
                    created
                }
            }
        };

        coordinator.start(key, token).await?;
        Ok(coordinator)
    }

    /// Get the live coordinator for `key`
    pub fn get(&self, key: &SubscriptionKey) -> Option<Arc<ConnectionCoordinator<T>>> {
        self.coordinators
            .get(key)
            .and_then(|entry| entry.upgrade())
            .filter(|c| !c.is_disposed())
    }

    /// Number of live coordinators
    pub fn len(&self) -> usize {
        self.coordinators
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Check if no coordinator is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget entries whose coordinators were dropped
    pub fn prune(&self) {
        self.coordinators.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Dispose every live coordinator and clear the registry
    pub async fn dispose_all(&self) {
        let live: Vec<_> = self
            .coordinators
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        self.coordinators.clear();

        for coordinator in live {
            coordinator.dispose().await;
        }
    }
}

impl<T: SyncedEntity> fmt::Debug for CoordinatorRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorRegistry")
            .field("channel", &T::CHANNEL)
            .field("live", &self.len())
            .finish()
    }
}
