//! Gantry Types - Core types for the content pipeline orchestrator
//!
//! Gantry sequences the fixed steps of a content-production run, persists
//! durable run state, holds the run at human approval gates and keeps
//! concurrent workers from executing the same step twice.
//!
//! ## Key Concepts
//!
//! - **Run**: One end-to-end attempt, versioned for compare-and-swap writes
//! - **Step**: One named unit of work in the fixed sequence
//! - **Receipt**: Immutable record of one step execution attempt
//! - **Gate**: Human approval checkpoint (`gate1`, `gate2`)
//! - **ContractReport**: PASS/WARN/FAIL verdict from one validator
//! - **OpsTierReport**: Execution tier derived from budget and failure pressure
//! - **LockRecord**: Time-bounded lease with a fencing token
//!
//! This crate holds data only. Storage lives in `gantry-state`, behaviour in
//! `gantry-engine`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod contract;
pub mod gate;
pub mod hash;
pub mod ids;
pub mod lock;
pub mod ops;
pub mod receipt;
pub mod run;
pub mod step;

pub use contract::{ContractReport, Finding, Verdict};
pub use gate::{DecisionAction, Gate, GateDecisionRecord, GateName, GateState};
pub use hash::{ContentHash, HashError};
pub use ids::{RunId, WorkerIdentity};
pub use lock::{FencingToken, LockKey, LockRecord};
pub use ops::{OpsTier, OpsTierReport};
pub use receipt::{Receipt, ReceiptId, ReceiptResult, StepErrorKind};
pub use run::{Run, StepState};
pub use step::{Stage, StepName, StepStatus};
