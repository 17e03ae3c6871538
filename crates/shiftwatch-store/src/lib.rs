pub mod database;
pub mod distractions;
pub mod error;
pub mod incidents;
pub mod schema;

pub use database::Database;
pub use distractions::{DistractionRecord, DistractionRepo};
pub use error::StoreError;
pub use incidents::{IncidentRepo, IncidentSink};
