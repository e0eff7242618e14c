//! # Gantry State - Durable storage for pipeline runs
//!
//! This crate owns every piece of shared mutable state the orchestrator
//! touches. Nothing else reads or writes run state directly.
//!
//! - [`RunStore`]: versioned run aggregate with compare-and-swap `save`
//! - [`ReceiptLedger`]: append-only receipts, lazily streamed in `started_at` order
//! - [`LeaseStore`]: time-bounded leases with strictly increasing fencing tokens
//! - [`ArtifactStore`]: artifact and report files inside a run's directory
//!
//! Two backends implement all four traits:
//!
//! - [`InMemoryStore`] for tests and single-process embedding
//! - [`FsStore`] for the on-disk run directory layout shared by workers
//!
//! ## Run directory layout
//!
//! ```text
//! <root>/<run_id>/run.json
//! <root>/<run_id>/receipts/<started_at_micros>-<receipt_id>.json
//! <root>/<run_id>/<contract>_report.json
//! <root>/<run_id>/ops_tier_report.json
//! <root>/<run_id>/<artifacts produced by steps>
//! <root>/.leases/<hex(resource_key)>.json
//! <root>/.leases/fencing.seq
//! ```

pub mod error;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use storage::{
    validate_relative_path, ArtifactStore, FsStore, InMemoryStore, LeaseStore, ReceiptLedger,
    RunStore, Storage,
};
