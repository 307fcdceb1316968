//! The interface to the energy backend.
//!
//! The engine never models molecular physics itself. Single and pair energies feed the
//! energy matrices, and full-conformation evaluations (the expensive continuous
//! minimizations) are dispatched to worker threads through [`ConfEnergyCalculator::evaluate`].

pub mod table;

use super::space::ConfSpace;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use table::{EnergyBounds, TabulatedEnergies};

/// Which flavor of energy a matrix or evaluation uses.
///
/// Minimized energies are lower bounds on what continuous minimization can reach; rigid
/// energies are evaluated at the ideal rotamer geometry and bound minimized energies from
/// above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyModel {
    Minimized,
    Rigid,
}

impl EnergyModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyModel::Minimized => "minimized",
            EnergyModel::Rigid => "rigid",
        }
    }
}

impl fmt::Display for EnergyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of evaluating one full conformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyEvaluation {
    /// Energy in kcal/mol.
    pub energy: f64,
    /// Backend-defined cost of the evaluation, accumulated for reporting.
    pub cost: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Energy evaluation failed in '{space_id}' for conformation {conformation:?}: {reason}")]
pub struct MinimizationFailure {
    pub space_id: String,
    pub conformation: Vec<usize>,
    pub reason: String,
}

impl MinimizationFailure {
    pub fn new(space_id: &str, conformation: &[usize], reason: impl Into<String>) -> Self {
        Self {
            space_id: space_id.to_string(),
            conformation: conformation.to_vec(),
            reason: reason.into(),
        }
    }
}

/// An energy backend shared by the matrix builder and the minimization workers.
///
/// Implementations must be callable concurrently from several threads.
pub trait ConfEnergyCalculator: Send + Sync {
    fn single_energy(
        &self,
        space: &ConfSpace,
        pos: usize,
        rc: usize,
        model: EnergyModel,
    ) -> Result<f64, MinimizationFailure>;

    fn pair_energy(
        &self,
        space: &ConfSpace,
        pos1: usize,
        rc1: usize,
        pos2: usize,
        rc2: usize,
        model: EnergyModel,
    ) -> Result<f64, MinimizationFailure>;

    /// Energy of the full conformation `conformation` (one RC index per position).
    fn evaluate(
        &self,
        space: &ConfSpace,
        conformation: &[usize],
        model: EnergyModel,
    ) -> Result<EnergyEvaluation, MinimizationFailure>;

    /// Identifies the single and pair energies this backend produces.
    ///
    /// A cached energy matrix is reused only when it was built with the same fingerprint.
    /// `None` means the energies cannot be identified, which disables matrix caching.
    fn fingerprint(&self) -> Option<u64> {
        None
    }
}
