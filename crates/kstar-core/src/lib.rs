//! # BBK* Core Library
//!
//! A library for provable binding-affinity design of protein sequences. For every
//! candidate sequence it bounds the K* score, the ratio of the bound-complex partition
//! function to the product of the unbound protein and ligand partition functions, and it
//! spends computational effort only where the bounds of competing sequences still overlap.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (conformation spaces, sequences,
//!   energy matrices), Boltzmann-weight arithmetic, the energy calculator interface and
//!   the design file reader.
//!
//! - **[`engine`]: The Logic Core.** The stateful machinery: the A* conformation search,
//!   the MARK* and traditional partition function estimators, the minimization worker
//!   pool and the BBK* sequence-level branch-and-bound driver.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures that tie `engine` and `core`
//!   together, such as running a complete design and querying conformational ensembles of
//!   the finished run.

pub mod core;
pub mod engine;
pub mod workflows;
