pub mod sink;

pub use sink::{InMemoryAuditSink, JsonlFileAuditSink};
