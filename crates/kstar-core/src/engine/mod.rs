//! # Engine Module
//!
//! This module implements the stateful search machinery of the design engine: the
//! conformation search, the partition function estimators built on it, and the
//! sequence-level branch and bound that ranks candidate sequences by K* score.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Validated run parameters and refinement policies
//! - **State Contexts** ([`context`]) - Per-state conformation space and energy matrices
//! - **Conformation Search** ([`search`]) - Best-first enumeration of conformations
//! - **Partition Functions** ([`pfunc`]) - MARK* and traditional bound estimators
//! - **Worker Pool** ([`pool`]) - Threads running full-conformation minimizations
//! - **Sequence Search** ([`bbkstar`]) - Branch and bound over candidate sequences
//! - **Sequence Tree Bounds** (`sequence_bounds`) - Bounds shared by all sequences below a tree node
//! - **Results** ([`kstar`], [`state`]) - K* intervals, sequence statuses and snapshots
//! - **Progress Monitoring** ([`progress`]) - Progress reporting callbacks
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Everything here runs on one control thread except the minimizations dispatched to
//! the pool and the parallel energy matrix builder.

pub mod bbkstar;
pub mod config;
pub mod context;
pub mod error;
pub mod kstar;
pub mod pfunc;
pub mod pool;
pub mod progress;
pub(crate) mod scoring;
pub mod search;
pub(crate) mod sequence_bounds;
pub mod state;
pub(crate) mod tasks;
