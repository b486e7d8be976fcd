//! Inbound frame dispatch onto the store

use crate::hooks::{CreatedInfo, Hooks};
use parking_lot::RwLock;
use std::marker::PhantomData;
use tablesync_store::{SyncStore, UpsertOutcome};
use tablesync_types::{InboundMessage, SyncedEntity};
use tracing::{debug, warn};

/// What a frame did to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<T> {
    /// `INITIAL_SNAPSHOT` replaced the collection
    Snapshot {
        /// Entities now in the store
        count: usize,
        /// Entities not present before
        added: Vec<T>,
    },
    /// `INITIAL_SNAPSHOT` with an empty or missing list; store untouched
    SnapshotIgnored,
    /// `CREATED` for a new id
    Created(T),
    /// `CREATED` for an id already present; store untouched
    Duplicate(String),
    /// `UPDATED` applied (or inserted, or dropped as stale)
    Updated {
        /// Entity as sent by the server
        entity: T,
        /// Store outcome
        outcome: UpsertOutcome,
    },
    /// `DELETED`
    Deleted {
        /// Entity id
        id: String,
        /// Whether the id was present
        existed: bool,
    },
    /// `ERROR` frame
    ServerError(String),
    /// Malformed or unrecognized frame
    Dropped(String),
}

/// Maps inbound frames onto store operations
///
/// Never fails: malformed and unknown frames are logged and dropped.
pub struct MessageDispatcher<T> {
    hooks: Hooks,
    _entity: PhantomData<fn() -> T>,
}

impl<T: SyncedEntity> MessageDispatcher<T> {
    /// Create a dispatcher invoking `hooks.on_created` for new entities
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks,
            _entity: PhantomData,
        }
    }

    /// Parse one raw frame and apply it to `store`
    ///
    /// Parsing happens before the store lock is taken; hooks run after it
    /// is released.
    pub fn dispatch(&self, raw: &str, store: &RwLock<SyncStore<T>>) -> Dispatch<T> {
        let message = match InboundMessage::<T>::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed {} frame: {}", T::CHANNEL, e);
                return Dispatch::Dropped(e.to_string());
            }
        };
        debug!("Dispatching {} on {}", message.kind(), T::CHANNEL);

        let outcome = match message {
            InboundMessage::InitialSnapshot { items } => match items {
                Some(items) if !items.is_empty() => {
                    let count = items.len();
                    let added = store.write().replace_all(items);
                    Dispatch::Snapshot { count, added }
                }
                _ => {
                    debug!("Ignoring empty {} snapshot", T::CHANNEL);
                    Dispatch::SnapshotIgnored
                }
            },
            InboundMessage::Created { item } => {
                let inserted = store.write().insert_if_absent(item.clone());
                if inserted {
                    Dispatch::Created(item)
                } else {
                    Dispatch::Duplicate(item.id().to_string())
                }
            }
            InboundMessage::Updated { item } => {
                let outcome = store.write().upsert(item.clone());
                if outcome == UpsertOutcome::Stale {
                    debug!("Dropped stale update for {} {}", T::CHANNEL, item.id());
                }
                Dispatch::Updated {
                    entity: item,
                    outcome,
                }
            }
            InboundMessage::Deleted { id } => {
                let existed = store.write().remove(&id).is_some();
                Dispatch::Deleted { id, existed }
            }
            InboundMessage::Error { message } => {
                warn!("Server error on {}: {}", T::CHANNEL, message);
                Dispatch::ServerError(message)
            }
            InboundMessage::Unknown => {
                warn!("Dropping {} frame with unknown type", T::CHANNEL);
                Dispatch::Dropped("unknown message type".into())
            }
        };

        if let Dispatch::Created(entity) = &outcome {
            self.hooks.invoke_created(&CreatedInfo {
                channel: T::CHANNEL,
                id: entity.id().to_string(),
            });
        }

        outcome
    }
}

impl<T> std::fmt::Debug for MessageDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher").field("hooks", &self.hooks).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tablesync_types::{Order, OrderStatus};

    fn order_json(id: &str, status: &str) -> String {
        format!(
            r#"{{"id":"{}","restaurantId":"rest-1","status":"{}","totalAmount":"12.00"}}"#,
            id, status
        )
    }

    fn seeded_store(ids: &[&str]) -> RwLock<SyncStore<Order>> {
        let mut store = SyncStore::new();
        for id in ids {
            store.upsert(serde_json::from_str(&order_json(id, "pending")).unwrap());
        }
        RwLock::new(store)
    }

    #[test]
    fn test_empty_snapshot_keeps_store() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new());
        let store = seeded_store(&["order-1", "order-2"]);

        let outcome = dispatcher.dispatch(r#"{"type":"INITIAL_SNAPSHOT","items":[]}"#, &store);
        assert_eq!(outcome, Dispatch::SnapshotIgnored);
        let outcome = dispatcher.dispatch(r#"{"type":"INITIAL_SNAPSHOT"}"#, &store);
        assert_eq!(outcome, Dispatch::SnapshotIgnored);
        assert_eq!(store.read().len(), 2);
    }

    #[test]
    fn test_snapshot_replaces_store() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new());
        let store = seeded_store(&["order-1", "order-2"]);

        let frame = format!(
            r#"{{"type":"INITIAL_SNAPSHOT","items":[{},{}]}}"#,
            order_json("order-2", "ready"),
            order_json("order-3", "pending")
        );
        match dispatcher.dispatch(&frame, &store) {
            Dispatch::Snapshot { count, added } => {
                assert_eq!(count, 2);
                assert_eq!(added.len(), 1);
                assert_eq!(added[0].id, "order-3");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!store.read().contains("order-1"));
    }

    #[test]
    fn test_created_dedup_and_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hooks = Hooks::new().on_created(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = MessageDispatcher::<Order>::new(hooks);
        let store = seeded_store(&[]);

        let frame = format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("order-9", "pending"));
        assert!(matches!(dispatcher.dispatch(&frame, &store), Dispatch::Created(_)));
        assert_eq!(
            dispatcher.dispatch(&frame, &store),
            Dispatch::Duplicate("order-9".into())
        );
        assert_eq!(store.read().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_hook_does_not_break_dispatch() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new().on_created(|_| panic!("no audio")));
        let store = seeded_store(&[]);

        let frame = format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("order-1", "pending"));
        assert!(matches!(dispatcher.dispatch(&frame, &store), Dispatch::Created(_)));
        assert!(store.read().contains("order-1"));
    }

    #[test]
    fn test_repeated_ids_converge_to_latest() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new());
        let store = seeded_store(&[]);

        let frames = [
            format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("a", "pending")),
            format!(r#"{{"type":"UPDATED","item":{}}}"#, order_json("b", "preparing")),
            format!(r#"{{"type":"UPDATED","item":{}}}"#, order_json("a", "preparing")),
            format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("b", "pending")),
            format!(r#"{{"type":"UPDATED","item":{}}}"#, order_json("a", "ready")),
        ];
        for frame in &frames {
            dispatcher.dispatch(frame, &store);
        }

        let snapshot = store.read().snapshot();
        assert_eq!(snapshot.len(), 2);
        let a = snapshot.iter().find(|o| o.id == "a").unwrap();
        let b = snapshot.iter().find(|o| o.id == "b").unwrap();
        assert_eq!(a.status, OrderStatus::Ready);
        assert_eq!(b.status, OrderStatus::Preparing);
    }

    #[test]
    fn test_trailing_duplicate_created_keeps_known_payload() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new());
        let store = seeded_store(&[]);

        let frames = [
            format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("a", "pending")),
            format!(r#"{{"type":"UPDATED","item":{}}}"#, order_json("a", "preparing")),
            format!(r#"{{"type":"CREATED","item":{}}}"#, order_json("a", "cancelled")),
        ];
        let outcomes: Vec<_> = frames.iter().map(|f| dispatcher.dispatch(f, &store)).collect();

        assert_eq!(outcomes[2], Dispatch::Duplicate("a".into()));
        assert_eq!(store.read().len(), 1);
        assert_eq!(store.read().get("a").unwrap().status, OrderStatus::Preparing);
    }

    #[test]
    fn test_deleted_and_errors() {
        let dispatcher = MessageDispatcher::<Order>::new(Hooks::new());
        let store = seeded_store(&["order-1"]);

        assert_eq!(
            dispatcher.dispatch(r#"{"type":"DELETED","id":"order-1"}"#, &store),
            Dispatch::Deleted {
                id: "order-1".into(),
                existed: true
            }
        );
        assert!(store.read().is_empty());

        assert_eq!(
            dispatcher.dispatch(r#"{"type":"ERROR","message":"kitchen offline"}"#, &store),
            Dispatch::ServerError("kitchen offline".into())
        );
        assert!(matches!(dispatcher.dispatch("not json", &store), Dispatch::Dropped(_)));
        assert!(matches!(
            dispatcher.dispatch(r#"{"type":"PING"}"#, &store),
            Dispatch::Dropped(_)
        ));
    }
}
