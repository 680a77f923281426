// Offline Store Port
// Durable FIFO of results that could not be delivered yet.
// Unique per (activity, timestamp); selection is ordered by timestamp ascending.

use crate::domain::{ActivityId, OfflineRecord};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Insert a record
    ///
    /// Returns false when it was not stored: duplicate key, closed store or I/O error.
    async fn insert(&self, record: OfflineRecord) -> bool;

    /// Insert many records, skipping the ones that cannot be stored. Returns how many were stored.
    async fn insert_bulk(&self, records: Vec<OfflineRecord>) -> usize {
        let mut stored = 0;
        for record in records {
            if self.insert(record).await {
                stored += 1;
            }
        }
        stored
    }

    /// Oldest records first, at most `limit`
    async fn select(&self, limit: usize) -> Result<Vec<OfflineRecord>>;

    /// Delete rows matching any of the row ids OR any of the activities
    async fn delete(&self, row_ids: &[i64], activities: &[ActivityId]) -> Result<u64>;

    /// Delete every row whose activity is NOT in `keep_activities`
    async fn truncate(&self, keep_activities: &[ActivityId]) -> Result<u64>;

    /// Drain pending writes and release the store; later calls fail
    async fn close(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        rows: Vec<OfflineRecord>,
        next_row_id: i64,
        closed: bool,
    }

    /// In-memory store with the same ordering and uniqueness rules as the real one
    #[derive(Default)]
    pub struct InMemoryOfflineStore {
        state: Mutex<State>,
    }

    impl InMemoryOfflineStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.state.lock().unwrap().rows.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn records(&self) -> Vec<OfflineRecord> {
            self.state.lock().unwrap().rows.clone()
        }
    }

    #[async_trait]
    impl OfflineStore for InMemoryOfflineStore {
        async fn insert(&self, mut record: OfflineRecord) -> bool {
            let mut state = self.state.lock().unwrap();
            if state.closed
                || state
                    .rows
                    .iter()
                    .any(|r| r.activity == record.activity && r.timestamp == record.timestamp)
            {
                return false;
            }
            state.next_row_id += 1;
            record.row_id = Some(state.next_row_id);
            state.rows.push(record);
            true
        }

        async fn select(&self, limit: usize) -> Result<Vec<OfflineRecord>> {
            let state = self.state.lock().unwrap();
            if state.closed {
                return Err(AppError::Database("offline store closed".to_string()));
            }
            let mut rows = state.rows.clone();
            rows.sort_by_key(|r| (r.timestamp, r.row_id));
            rows.truncate(limit);
            Ok(rows)
        }

        async fn delete(&self, row_ids: &[i64], activities: &[ActivityId]) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            let before = state.rows.len();
            state.rows.retain(|r| {
                let by_row = r.row_id.map_or(false, |id| row_ids.contains(&id));
                !(by_row || activities.contains(&r.activity))
            });
            Ok((before - state.rows.len()) as u64)
        }

        async fn truncate(&self, keep_activities: &[ActivityId]) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            let before = state.rows.len();
            state.rows.retain(|r| keep_activities.contains(&r.activity));
            Ok((before - state.rows.len()) as u64)
        }

        async fn close(&self) {
            self.state.lock().unwrap().closed = true;
        }
    }
}
