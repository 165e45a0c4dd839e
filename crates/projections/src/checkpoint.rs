use std::collections::HashMap;
use std::sync::RwLock;

use escore_store::event_store::Cursor;

/// Durable position tracking, one cursor per projection name.
///
/// Grounded on `infra::projections::cursor_store::ProjectionCursorStore`,
/// generalized from a per-(tenant, aggregate, projection) key to a single
/// global cursor per projection, since projections here consume the
/// store's global `stream_all` ordering rather than one stream at a time.
pub trait CheckpointStore: Send + Sync {
    fn get_checkpoint(&self, projection_name: &str) -> Option<Cursor>;
    fn set_checkpoint(&self, projection_name: &str, cursor: Cursor);
    fn clear_checkpoint(&self, projection_name: &str);
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    cursors: RwLock<HashMap<String, Cursor>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get_checkpoint(&self, projection_name: &str) -> Option<Cursor> {
        self.cursors.read().unwrap_or_else(|e| e.into_inner()).get(projection_name).copied()
    }

    fn set_checkpoint(&self, projection_name: &str, cursor: Cursor) {
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(projection_name.to_string(), cursor);
    }

    fn clear_checkpoint(&self, projection_name: &str) {
        self.cursors.write().unwrap_or_else(|e| e.into_inner()).remove(projection_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_clears() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.get_checkpoint("orders").is_none());

        store.set_checkpoint("orders", Cursor(5));
        assert_eq!(store.get_checkpoint("orders"), Some(Cursor(5)));

        store.set_checkpoint("orders", Cursor(9));
        assert_eq!(store.get_checkpoint("orders"), Some(Cursor(9)));

        store.clear_checkpoint("orders");
        assert!(store.get_checkpoint("orders").is_none());
    }
}
