//! Entity store with dedup and optimistic mutation tracking
//!
//! # Reconciliation
//!
//! ```text
//!   authoritative ──apply_optimistic──▶ optimistic (pending)
//!        ▲                                  │
//!        │ upsert / replace_all             │ rollback(ticket)
//!        │ (server wins)                    ▼
//!        └──────────────────────────── last known-good
//! ```
//!
//! Any authoritative write for an id supersedes its pending mutation.

use std::collections::HashMap;
use tablesync_types::{Patch, SyncError, SyncResult, SyncedEntity};

/// Transport a mutation was issued over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationTransport {
    /// Sent over the push socket, applied optimistically
    Socket,
    /// Sent over REST
    Rest,
}

/// Identifies one optimistic mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationTicket(u64);

impl MutationTicket {
    /// Raw ticket number
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A mutation applied locally but not yet acknowledged
#[derive(Debug, Clone)]
pub struct PendingMutation<T> {
    /// Ticket of the most recent mutation for this id
    pub ticket: MutationTicket,
    /// Requested field changes
    pub patch: Patch,
    /// Transport the mutation went out on
    pub transport: MutationTransport,
    /// Last authoritative state, restored on rollback
    base: T,
}

impl<T> PendingMutation<T> {
    /// Last authoritative state before the mutation
    pub fn base(&self) -> &T {
        &self.base
    }
}

/// How authoritative writes with older timestamps are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Every authoritative write wins, regardless of timestamps
    #[default]
    LastWriteWins,
    /// Writes whose `updatedAt` is older than the stored one are dropped
    NewerOnly,
}

/// Result of an authoritative upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Id was not present
    Inserted,
    /// Stored entity changed
    Updated,
    /// Stored entity already matched
    Unchanged,
    /// Dropped by [`StalePolicy::NewerOnly`]
    Stale,
}

/// Canonical collection of one channel's entities
#[derive(Debug, Clone)]
pub struct SyncStore<T> {
    /// Entities keyed by id
    entities: HashMap<String, T>,
    /// Ids in first-seen order
    order: Vec<String>,
    /// Outstanding optimistic mutations keyed by id
    pending: HashMap<String, PendingMutation<T>>,
    /// Next mutation ticket
    next_ticket: u64,
    /// Timestamp guard for authoritative writes
    stale_policy: StalePolicy,
}

impl<T: SyncedEntity> Default for SyncStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncedEntity> SyncStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            order: Vec::new(),
            pending: HashMap::new(),
            next_ticket: 1,
            stale_policy: StalePolicy::default(),
        }
    }

    /// Create an empty store with a timestamp guard
    pub fn with_stale_policy(policy: StalePolicy) -> Self {
        Self {
            stale_policy: policy,
            ..Self::new()
        }
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check if an id is present
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Get an entity by id
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entities.get(id)
    }

    /// All entities, in first-seen order
    pub fn snapshot(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }

    /// Apply an authoritative entity state
    ///
    /// Clears any pending mutation for the id.
    pub fn upsert(&mut self, entity: T) -> UpsertOutcome {
        let id = entity.id().to_string();

        if self.is_stale(&entity) {
            return UpsertOutcome::Stale;
        }
        self.pending.remove(&id);

        match self.entities.get_mut(&id) {
            Some(current) if *current == entity => UpsertOutcome::Unchanged,
            Some(current) => {
                *current = entity;
                UpsertOutcome::Updated
            }
            None => {
                self.order.push(id.clone());
                self.entities.insert(id, entity);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Insert an entity only if its id is not present yet
    ///
    /// Returns `false` for duplicates, leaving the stored entity untouched.
    pub fn insert_if_absent(&mut self, entity: T) -> bool {
        if self.entities.contains_key(entity.id()) {
            return false;
        }
        let id = entity.id().to_string();
        self.order.push(id.clone());
        self.entities.insert(id, entity);
        true
    }

    /// Remove an entity by id
    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.pending.remove(id);
        let removed = self.entities.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Replace the whole collection with an authoritative list
    ///
    /// Repeated ids within `entities` collapse to the last occurrence. All
    /// pending mutations are superseded. Returns the entities whose ids were
    /// not present before the call.
    pub fn replace_all(&mut self, entities: Vec<T>) -> Vec<T> {
        let previous = std::mem::take(&mut self.entities);
        self.order.clear();
        self.pending.clear();

        for entity in entities {
            let id = entity.id().to_string();
            if self.entities.insert(id.clone(), entity).is_none() {
                self.order.push(id);
            }
        }

        self.order
            .iter()
            .filter(|id| !previous.contains_key(id.as_str()))
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }

    /// Apply a patch locally before the server confirms it
    ///
    /// Returns the optimistic entity and the ticket needed to roll it back.
    /// Stacked mutations on the same id keep the original known-good base.
    pub fn apply_optimistic(
        &mut self,
        id: &str,
        patch: &Patch,
        transport: MutationTransport,
    ) -> SyncResult<(T, MutationTicket)> {
        let current = self
            .entities
            .get(id)
            .ok_or_else(|| SyncError::UnknownEntity { id: id.to_string() })?;
        let patched = current.with_patch(patch)?;

        let base = match self.pending.remove(id) {
            Some(previous) => previous.base,
            None => current.clone(),
        };

        let ticket = MutationTicket(self.next_ticket);
        self.next_ticket += 1;

        self.pending.insert(
            id.to_string(),
            PendingMutation {
                ticket,
                patch: patch.clone(),
                transport,
                base,
            },
        );
        self.entities.insert(id.to_string(), patched.clone());

        Ok((patched, ticket))
    }

    /// Undo an optimistic mutation
    ///
    /// Only acts if `ticket` is still the latest pending mutation for `id`;
    /// a superseded ticket is a no-op. Returns the restored entity.
    pub fn rollback(&mut self, id: &str, ticket: MutationTicket) -> Option<T> {
        if self.pending.get(id)?.ticket != ticket {
            return None;
        }
        let pending = self.pending.remove(id)?;
        self.entities.insert(id.to_string(), pending.base.clone());
        Some(pending.base)
    }

    /// Check if an id has an unacknowledged mutation
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Get the pending mutation for an id
    pub fn pending(&self, id: &str) -> Option<&PendingMutation<T>> {
        self.pending.get(id)
    }

    /// Number of unacknowledged mutations
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn is_stale(&self, incoming: &T) -> bool {
        if self.stale_policy != StalePolicy::NewerOnly {
            return false;
        }
        let id = incoming.id();
        let reference = match self.pending.get(id) {
            Some(pending) => Some(&pending.base),
            None => self.entities.get(id),
        };
        match (reference.and_then(|r| r.updated_at()), incoming.updated_at()) {
            (Some(stored), Some(new)) => new < stored,
            _ => false,
        }
    }
}
