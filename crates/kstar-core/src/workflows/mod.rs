//! # Workflows Module
//!
//! High-level entry points that run a complete design from a loaded design space.
//!
//! - **Design Workflow** ([`design`]) - Builds the energy matrices of every state and
//!   ranks the candidate sequences by K* score.
//! - **Analysis** ([`analysis`]) - Read-only queries over a finished design run, such as
//!   the lowest-energy conformations of a sequence.

pub mod analysis;
pub mod design;
