//! Bookmarker Server Library
//!
//! Exposes the repositories and router so they can be driven from tests and
//! from the server binary in main.rs.
//!
//! # Modules
//!
//! - `db`: SQLite schema plus the book and annotation repositories
//! - `routes`: JSON API over the repositories
//! - `config`, `error`, `state`: server plumbing

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
