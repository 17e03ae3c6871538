use tracing::instrument;

use shiftwatch_core::IncidentRecord;

use crate::database::Database;
use crate::error::StoreError;

/// Durable sink for incident records.
///
/// Insert-only: records are never updated once written.
pub trait IncidentSink: Send + Sync {
    fn insert_incident(&self, record: &IncidentRecord) -> Result<(), StoreError>;
}

pub struct IncidentRepo {
    db: Database,
}

impl IncidentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl IncidentSink for IncidentRepo {
    #[instrument(skip(self, record), fields(account_id = %record.account_id, reason = %record.reason))]
    fn insert_incident(&self, record: &IncidentRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO incident_sessions (account_id, status, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.account_id.as_str(),
                    record.kind.as_str(),
                    record.reason.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}
