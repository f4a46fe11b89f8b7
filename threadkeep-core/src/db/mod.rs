//! Metadata store for threadkeep
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Transactional nickname assignment

pub mod repo;
pub mod schema;

pub use repo::{Database, MetadataFilter};
