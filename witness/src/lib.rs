//! Witness - justified actions, derivations and crystallized memory
//!
//! Records what was done and why, connects it to the principles it derives
//! from, and compresses the record into progressively higher-level insights:
//!
//! - **Mark ledger**: append-only log of marks with a causal parent DAG
//! - **Derivation graph**: acyclic graph of loss-carrying derivation paths
//! - **Crystallization**: session, day, week and epoch crystals
//! - **Constitutional scoring**: per-domain principle scores on append
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Witness                           │
//! │                                                          │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ MarkLedger  │──▶│ Crystallizer │──▶│ Derivation    │  │
//! │  │ (+ scorer)  │   │  (runs)      │   │ Graph         │  │
//! │  └──────┬──────┘   └──────┬───────┘   └───────────────┘  │
//! │         │                 │                              │
//! │  ┌──────▼─────────────────▼───────┐                      │
//! │  │  AppendStore (memory | jsonl)  │                      │
//! │  └────────────────────────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crystal;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod mark;
pub mod service;
pub mod store;

pub use config::{CrystalConfig, LedgerConfig, StorageConfig, WitnessConfig};
pub use crystal::{Crystal, CrystalFilter, CrystalLevel};
pub use engine::{CrystallizationEngine, CrystallizationRun, FailureReason, RunState, StateTransition};
pub use error::{ErrorClass, Result, WitnessError};
pub use ledger::MarkLedger;
pub use mark::{Layer, Mark, MarkDraft, MarkFilter};
pub use service::Witness;
pub use store::{AppendStore, JsonlStore, MemoryStore, Record, StoreError};

pub use tokio_util::sync::CancellationToken;
