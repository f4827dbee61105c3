//! # Stratum Database Crate
//!
//! Postgres persistence for conditions, subscriptions, bots, runs,
//! positions, and orders. `DbRepository` encapsulates every SQL statement;
//! nothing above this crate writes queries.
//!
//! The repository also implements `conditions::ConditionStore`, which is
//! how the registry and evaluator persist fingerprints without depending
//! on this crate directly.

pub mod connection;
pub mod error;
pub mod repository;
mod store;

pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::DbRepository;
