use chrono::{DateTime, Utc};
use tracing::instrument;

use shiftwatch_core::AccountId;

use crate::database::Database;
use crate::error::StoreError;

/// A client-reported focus sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistractionRecord {
    pub account_id: AccountId,
    pub status: String,
    /// Consecutive "NO ACTIVE" reports up to and including this one.
    pub note: u32,
    pub created_at: DateTime<Utc>,
}

pub struct DistractionRepo {
    db: Database,
}

impl DistractionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, record), fields(account_id = %record.account_id, status = %record.status))]
    pub fn insert(&self, record: &DistractionRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO distraction_sessions (account_id, status, note, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.account_id.as_str(),
                    record.status,
                    record.note,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}
