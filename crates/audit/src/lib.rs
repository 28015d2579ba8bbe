pub mod record;
pub mod store;

pub use record::{AuditEvent, AuditPage, AuditQuery, to_csv};
pub use store::{AuditStore, InMemoryAuditStore};
