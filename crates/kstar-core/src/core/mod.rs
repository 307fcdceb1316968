//! # Core Module
//!
//! Stateless building blocks shared by the search engine.
//!
//! - **Conformation spaces** ([`space`]) - Mutable positions, residue conformations (RCs) and
//!   the protein / ligand / complex design space
//! - **Sequences** ([`sequence`]) - Sequence identity, per-sequence RC restriction and the
//!   enumeration of the sequence space
//! - **Energies** ([`energy`]) - The energy calculator interface and a tabulated reference backend
//! - **Energy matrices** ([`matrix`]) - Precomputed single and pair energies with an on-disk cache
//! - **Statistical mechanics** ([`boltzmann`]) - Boltzmann weights, compensated summation and
//!   log-space partition function bounds
//! - **File I/O** ([`io`]) - The TOML design file format

pub mod boltzmann;
pub mod energy;
pub mod io;
pub mod matrix;
pub mod sequence;
pub mod space;
