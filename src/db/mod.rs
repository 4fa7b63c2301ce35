//! Database module for PostgreSQL connection and operations
//!
//! The harness talks to PostgreSQL only through this module: the pool in
//! `connection` and the `QueryBackend` seam in `backend`.

pub mod backend;
pub mod connection;

pub use backend::{PgBackend, QueryBackend, StateFingerprint};
pub use connection::init_pool;
