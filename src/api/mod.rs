//! Read-only query layer over the catalog snapshot
//!
//! Every request re-reads the snapshot file, so the scheduler and the server share
//! nothing but the file on disk.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
