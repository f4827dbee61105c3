//! # Stratum Executor Crate
//!
//! This crate provides the DCA bot executor and the execution sinks it
//! places orders through. It owns three concerns:
//!
//! - **The state machine** (`machine`): per-bot, event-driven DCA
//!   lifecycle — entry fills, DCA accumulation under rule and cap checks,
//!   profit taking, pause/resume/stop.
//! - **The paper broker** (`paper`): fulfils orders against live mark
//!   prices with per-bot virtual balances, fees, and a balance
//!   conservation law that is checked after every fill.
//! - **The pool** (`pool`): one task per active bot, fed by a bounded
//!   mailbox; events for the same bot are processed strictly serially.
//!
//! ## Architectural Principles
//!
//! - **Execution abstraction:** The state machine is agnostic about
//!   whether its sink is the paper broker or the signed exchange client;
//!   both sit behind `api_client::ExecutionClient`.
//! - **State vs. logic:** The machine owns authoritative in-memory state
//!   during a run and flushes it through the `StateStore` seam after
//!   every transition; the store never drives decisions.

pub mod config;
pub mod error;
pub mod machine;
pub mod paper;
pub mod pool;
pub mod state;
pub mod store;

pub use config::{Cooldown, DcaConfig, DcaRule, ProfitConfig, SizingConfig};
pub use error::ExecutorError;
pub use machine::DcaExecutor;
pub use paper::PaperBroker;
pub use pool::{ExecutorEvent, ExecutorPool, PoolDeps};
pub use state::BotState;
pub use store::{InMemoryStateStore, StateStore};
