//! AutumnDB - a JSON-Schema graph database layered over PostgreSQL
//!
//! This crate provides:
//! - A uniform contract document model with versioned slugs
//! - A JSON-Schema-to-SQL compiler with `$$links` graph expansion
//! - PostgreSQL-backed contract and link storage
//! - Row-change streaming over LISTEN/NOTIFY
//! - An HTTP query/stream API

pub mod backend;
pub mod config;
pub mod contract;
pub mod schema;
pub mod server;
pub mod sql;
