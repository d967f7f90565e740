//! Ordering guard for backward event replay.

use chrono::{DateTime, Utc};

use super::types::HistoryError;

/// Tracks the timestamp of the last processed event and rejects any event
/// that is newer than it. Equal timestamps are allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeCursor {
    last: Option<DateTime<Utc>>,
}

impl TimeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the cursor at `date`, so only events at or before it are accepted.
    pub fn starting_at(date: DateTime<Utc>) -> Self {
        Self { last: Some(date) }
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// Move the cursor back to `date`.
    pub fn advance(&mut self, date: DateTime<Utc>) -> Result<(), HistoryError> {
        if let Some(last) = self.last {
            if date > last {
                return Err(HistoryError::OutOfOrder { date, last });
            }
        }
        self.last = Some(date);
        Ok(())
    }
}
