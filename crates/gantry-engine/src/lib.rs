//! # Gantry Engine
//!
//! Orchestration core for the content pipeline: step execution, gates,
//! contracts, ops tiers and leases behind one facade.
//!
//! ## Overview
//!
//! The [`Orchestrator`] is the single entry point drivers use. It composes
//! the storage traits from `gantry-state` with:
//!
//! - [`StepExecutor`]: idempotent step execution with receipts
//! - [`GateController`]: human approval checkpoints with contract re-evaluation
//! - [`ContractRegistry`]: PASS/WARN/FAIL validators consulted before approval
//! - [`OpsTierEvaluator`]: budget and failure pressure mapped to an execution tier
//! - [`LockManager`]: leases with fencing tokens and background renewal
//! - [`RetryPolicy`]: bounded backoff used by drivers, never by the core
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gantry_engine::{DecisionRequest, Orchestrator, PipelineConfig};
//! use gantry_state::InMemoryStore;
//! use gantry_types::GateName;
//!
//! # async fn example() -> gantry_engine::Result<()> {
//! let orchestrator =
//!     Orchestrator::from_config(PipelineConfig::default(), Arc::new(InMemoryStore::new()))?;
//!
//! let run = orchestrator.init_run("audio").await?;
//! let progress = orchestrator.run_e2e(&run.run_id).await?;
//! println!("halted: {:?}", progress.halted);
//!
//! orchestrator
//!     .decide_gate(&run.run_id, GateName::Gate1, DecisionRequest::approve("reviewer"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Every mutating call holds the run lease and writes with its fencing
//! token. Contention surfaces as `VersionConflict`, `LockHeld` or
//! `LockExpired`; wrap calls in [`RetryPolicy::run`] to retry them.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod actions;
pub mod config;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod gate;
pub mod inputs;
pub mod lock;
pub mod ops_tier;
pub mod orchestrator;
pub mod retry;

// Re-exports
pub use actions::{CommandAction, StepAction, StepActions, StepContext, StepFailure, StepOutput};
pub use config::PipelineConfig;
pub use contracts::{Artifacts, ContractRegistry, ContractValidator};
pub use error::{EngineError, ErrorKind, Result};
pub use executor::{ReceiptSource, StepExecution, StepExecutor};
pub use gate::{DecisionRequest, GateController, GateDecision, GateOutcome};
pub use inputs::StepInputs;
pub use lock::{Heartbeat, LeaseGuard, LockManager};
pub use ops_tier::OpsTierEvaluator;
pub use orchestrator::{HaltReason, Orchestrator, RunOverview, RunProgress, RunSummary};
pub use retry::RetryPolicy;
