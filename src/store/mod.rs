//! Persistence layer: libSQL-backed storage for campaigns, enrollments,
//! delivery history and inbound replies.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{CampaignStore, InboundReplyRecord};
