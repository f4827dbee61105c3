//! # Stratum Condition Library
//!
//! The condition DSL and its registry. A bot's entry condition — a single
//! indicator/price/volume/pattern test, or a playbook of several — is
//! canonicalized here into a stable, deduplicated fingerprint so that the
//! shared evaluator computes each distinct condition exactly once per
//! cycle no matter how many bots declare it.
//!
//! ## Architectural Principles
//!
//! - **Canonical form first:** Every input is normalized (operator
//!   synonyms collapsed, defaults materialized, settings keys sorted,
//!   numbers reduced to canonical decimal strings) before hashing, so that
//!   formatting differences can never split a fingerprint.
//! - **Registry over a trait:** Persistence hides behind `ConditionStore`;
//!   the Postgres implementation lives in the `database` crate and an
//!   in-memory store ships here for paper mode and tests.
//! - **Playbooks wrap, never replace:** Each playbook item is registered
//!   as a condition in its own right; the playbook itself is a shallow
//!   wrapper fingerprint over the item fingerprints, the gate, and the
//!   connector/validity lists. Bots subscribe only to the wrapper.
//!
//! ## Public API
//!
//! - `ConditionSpec` / `PlaybookSpec` / `EntryCondition`: the accepted input.
//! - `canonicalize` / `fingerprint`: normalization and hashing.
//! - `Registry`: register/subscribe/unsubscribe operations.
//! - `ConditionStore`: the persistence contract.

pub mod canonical;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod model;
pub mod playbook;
pub mod registry;
pub mod store;

pub use canonical::{CanonicalCondition, canonicalize};
pub use error::ConditionError;
pub use fingerprint::fingerprint;
pub use memory::InMemoryStore;
pub use model::{CompareTo, ConditionKind, ConditionSpec, IndicatorRef, Operator};
pub use playbook::{
    CanonicalPlaybook, CanonicalPlaybookItem, EntryCondition, EvalOrder, Gate, Logic,
    PlaybookItemSpec, PlaybookSpec, Validity, canonicalize_playbook, chain, gate_result,
};
pub use registry::{RegisteredEntry, Registry, parse_entry};
pub use store::ConditionStore;
