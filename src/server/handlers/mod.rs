pub mod feedback;
pub mod ingest;
pub mod query;
pub mod system;
pub mod ui;
