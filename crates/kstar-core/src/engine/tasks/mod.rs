//! Precomputation tasks run before any search begins.
//!
//! Each task is a self-contained unit of parallel work whose result is read-only once
//! it returns.

pub mod energy_matrix;
