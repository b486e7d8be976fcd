//! Synced entity trait and mutation patches

use crate::channel::Channel;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A server-owned record kept in sync by a coordinator
///
/// `id` is stable and server-assigned. The mutable fields (order status,
/// notification read flag) are changed through [`Patch`]es.
pub trait SyncedEntity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The channel this entity type is delivered on
    const CHANNEL: Channel;

    /// Server-assigned id
    fn id(&self) -> &str;

    /// Last server-side modification time, if the server reports one
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// Return a copy of this entity with `patch` applied
    ///
    /// The patch is merged shallowly into the entity's wire representation.
    /// Patches that change the id or yield an invalid entity are rejected.
    fn with_patch(&self, patch: &Patch) -> SyncResult<Self> {
        let invalid = |reason: String| SyncError::InvalidPatch {
            id: self.id().to_string(),
            reason,
        };

        let mut value = serde_json::to_value(self).map_err(|e| invalid(e.to_string()))?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| invalid("entity is not a JSON object".into()))?;

        for (name, field) in patch.fields() {
            fields.insert(name.clone(), field.clone());
        }

        let patched: Self = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        if patched.id() != self.id() {
            return Err(invalid("patch must not change the entity id".into()));
        }

        Ok(patched)
    }
}

/// Field overrides requested by a mutation
///
/// Serialized as a plain JSON object, e.g. `{"status":"ready"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch an order's status
    pub fn status(status: impl Into<String>) -> Self {
        Self::new().field("status", Value::String(status.into()))
    }

    /// Patch a notification's read flag
    pub fn read(is_read: bool) -> Self {
        Self::new().field("isRead", Value::Bool(is_read))
    }

    /// Add or replace a field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Iterate over the patched fields
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Get a single patched field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Number of patched fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Patch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
