//! Request and response types, one module per API area.

pub mod archives;
pub mod ingest;
