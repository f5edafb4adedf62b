//! mailfeed Storage - Feed documents and their persistence
//!
//! This crate holds the feed document model, its Atom serializer/parser and
//! the two storage backends: one Atom file per inbox, or SQLite rows.

pub mod atom;
pub mod db;
pub mod file;
pub mod models;
pub mod repository;

pub use atom::AtomCodec;
pub use db::DatabasePool;
pub use file::{FileStorage, LocalStorage};
pub use models::*;
pub use repository::*;
