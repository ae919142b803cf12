//! Integration tests against a live PostgreSQL instance.
//!
//! Set `AUTUMNDB_TEST_DATABASE_URL` to run these; without it every test
//! skips silently so the suite stays green on machines without a database.

mod common;
mod contract_tests;
mod link_tests;
mod stream_tests;
