// src/dag/mod.rs

//! Dependency graph and wave scheduling.
//!
//! - [`graph`] holds the `blocked_by` graph of a task set.
//! - [`waves`] layers that graph into execution waves.
//! - [`wave_store`] persists waves and verification records and drives
//!   their status.

pub mod graph;
pub mod wave_store;
pub mod waves;

pub use graph::DagGraph;
pub use wave_store::{VerificationRecord, Wave, WaveSet, WaveStatus, WaveStore};
pub use waves::{WavePlan, compute_waves};
