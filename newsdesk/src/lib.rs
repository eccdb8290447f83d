// Library interface for newsdesk modules
// This allows tests and the binary to import modules

pub mod analysis;
pub mod cache;
pub mod dedup;
pub mod error;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod pagination;
pub mod preferences;
pub mod selection;
pub mod server;
pub mod session;
pub mod sources;
