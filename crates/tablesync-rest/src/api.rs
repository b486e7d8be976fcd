//! REST collaborator abstraction
//!
//! Coordinators talk to the backend through [`EntityApi`] so that the
//! fallback path can be exercised without a running server.

use crate::error::RestResult;
use async_trait::async_trait;
use tablesync_types::{Patch, SubscriptionKey, SyncedEntity};

/// List and patch operations for one entity collection
#[async_trait]
pub trait EntityApi<T: SyncedEntity>: Send + Sync {
    /// Fetch the full collection for a subscription key
    async fn list(&self, key: &SubscriptionKey) -> RestResult<Vec<T>>;

    /// Apply a patch to one entity and return its authoritative state
    async fn update(&self, key: &SubscriptionKey, id: &str, patch: &Patch) -> RestResult<T>;
}

/// In-memory backend for testing
///
/// Clones share state, so a test can keep a handle while a coordinator owns
/// another one.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockEntityApi<T> {
    state: std::sync::Arc<parking_lot::Mutex<MockState<T>>>,
}

#[cfg(any(test, feature = "test-utils"))]
struct MockState<T> {
    entities: Vec<T>,
    list_calls: usize,
    update_calls: Vec<(String, Patch)>,
    fail_lists: usize,
    fail_updates: usize,
    unauthorized: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl<T> Clone for MockEntityApi<T> {
    fn clone(&self) -> Self {
        Self {
            state: std::sync::Arc::clone(&self.state),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl<T: SyncedEntity> Default for MockEntityApi<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl<T: SyncedEntity> MockEntityApi<T> {
    /// Create a mock backend holding `entities`
    pub fn new(entities: Vec<T>) -> Self {
        Self {
            state: std::sync::Arc::new(parking_lot::Mutex::new(MockState {
                entities,
                list_calls: 0,
                update_calls: Vec::new(),
                fail_lists: 0,
                fail_updates: 0,
                unauthorized: false,
            })),
        }
    }

    /// Replace the server-side collection
    pub fn set_entities(&self, entities: Vec<T>) {
        self.state.lock().entities = entities;
    }

    /// Insert or replace one server-side entity
    pub fn put(&self, entity: T) {
        let mut state = self.state.lock();
        match state.entities.iter_mut().find(|e| e.id() == entity.id()) {
            Some(existing) => *existing = entity,
            None => state.entities.push(entity),
        }
    }

    /// Current server-side collection
    pub fn entities(&self) -> Vec<T> {
        self.state.lock().entities.clone()
    }

    /// Fail the next `n` list calls with a 503
    pub fn fail_next_lists(&self, n: usize) {
        self.state.lock().fail_lists = n;
    }

    /// Fail the next `n` update calls with a 500
    pub fn fail_next_updates(&self, n: usize) {
        self.state.lock().fail_updates = n;
    }

    /// Answer every call with 401 while set
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.state.lock().unauthorized = unauthorized;
    }

    /// Number of list calls received
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Update calls received, as `(id, patch)`
    pub fn update_calls(&self) -> Vec<(String, Patch)> {
        self.state.lock().update_calls.clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl<T: SyncedEntity> EntityApi<T> for MockEntityApi<T> {
    async fn list(&self, _key: &SubscriptionKey) -> RestResult<Vec<T>> {
        use crate::error::RestError;

        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.unauthorized {
            return Err(RestError::Unauthorized("token expired".into()));
        }
        if state.fail_lists > 0 {
            state.fail_lists -= 1;
            return Err(RestError::Api {
                status: 503,
                message: "mock list failure".into(),
            });
        }
        Ok(state.entities.clone())
    }

    async fn update(&self, _key: &SubscriptionKey, id: &str, patch: &Patch) -> RestResult<T> {
        use crate::error::RestError;

        let mut state = self.state.lock();
        state.update_calls.push((id.to_string(), patch.clone()));
        if state.unauthorized {
            return Err(RestError::Unauthorized("token expired".into()));
        }
        if state.fail_updates > 0 {
            state.fail_updates -= 1;
            return Err(RestError::Api {
                status: 500,
                message: "mock update failure".into(),
            });
        }

        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or_else(|| RestError::Api {
                status: 404,
                message: format!("{} not found", id),
            })?;
        let patched = entity.with_patch(patch).map_err(|e| RestError::Api {
            status: 422,
            message: e.to_string(),
        })?;
        *entity = patched.clone();
        Ok(patched)
    }
}
