//! Adapters that live inside the domain crate.
//!
//! The in-memory store is a full `AnalyticsStore` used by tests, the demo
//! CLI and the api-server's `memory` storage provider. The SQLite store lives
//! in its own crate.

pub mod memory_repo;
