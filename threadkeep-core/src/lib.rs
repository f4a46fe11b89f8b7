//! # threadkeep-core
//!
//! Core library for threadkeep: one view over the AI chat history that
//! Cursor and Claude Code keep in their own private formats.
//!
//! This library provides:
//! - Read-only source readers normalizing both histories into one message model
//! - A metadata store (SQLite) for nicknames, tags and project associations
//! - A sync engine that re-imports only sessions whose source moved on
//! - [`SessionService`], the facade front ends use
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use threadkeep_core::{Config, ListOptions, SessionService};
//!
//! let config = Config::load().expect("failed to load config");
//! let mut service = SessionService::open(config).expect("failed to open store");
//!
//! for meta in service.list(&ListOptions::default()).expect("list failed") {
//!     println!("{} {}", meta.id, meta.preview.unwrap_or_default());
//! }
//! service.close().expect("close failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, MetadataFilter};
pub use error::{Error, Result};
pub use ingest::{SyncEngine, SyncReport};
pub use service::{ListOptions, SearchOptions, SessionService, SortOrder, Transcript};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod service;
pub mod types;
