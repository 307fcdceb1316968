//! Partition function estimators.
//!
//! An estimator bounds `Z = sum_c exp(-E(c) / RT)` over the conformations of one sequence
//! in one state, where `E(c)` is the minimized energy of conformation `c`. Bounds are
//! refined in steps; each step merges a batch of minimizations from the worker pool.

mod markstar;
mod traditional;

pub use markstar::MarkStarPfunc;
pub use traditional::TraditionalPfunc;

use super::config::{EstimatorSettings, PfuncMethod};
use super::context::StateContext;
use super::pool::MinimizationPool;
use crate::core::boltzmann::ZBounds;
use crate::core::sequence::Sequence;
use std::fmt;

/// Tolerance, in kcal/mol, on a minimized energy leaving the range its matrix bounds allow.
pub(crate) const ENERGY_TOLERANCE: f64 = 1e-6;

/// Attempts made on one conformation before the estimator gives up.
pub(crate) const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PfuncStatus {
    Estimating,
    Converged,
    /// Out of conformations or minimization budget before reaching epsilon.
    Exhausted,
    /// Upper bound fell below the stability threshold.
    Unstable,
    /// A conformation could not be minimized.
    Failed,
}

impl PfuncStatus {
    pub fn can_continue(&self) -> bool {
        matches!(self, PfuncStatus::Estimating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PfuncStatus::Estimating => "estimating",
            PfuncStatus::Converged => "converged",
            PfuncStatus::Exhausted => "exhausted",
            PfuncStatus::Unstable => "unstable",
            PfuncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PfuncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published state of one estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct PfuncState {
    pub bounds: ZBounds,
    /// Conformations that reached the minimizer.
    pub num_scored: usize,
    /// Conformations whose minimized energy has been merged.
    pub num_minimized: usize,
    /// Accumulated evaluation cost reported by the energy backend.
    pub cost: f64,
    pub status: PfuncStatus,
}

impl PfuncState {
    pub fn unstarted() -> Self {
        Self {
            bounds: ZBounds::UNKNOWN,
            num_scored: 0,
            num_minimized: 0,
            cost: 0.0,
            status: PfuncStatus::Estimating,
        }
    }
}

/// Checks whether a bounded estimator may stop, given its freshly published bounds.
pub(crate) fn settled_status(
    bounds: &ZBounds,
    epsilon: f64,
    stability: Option<f64>,
) -> Option<PfuncStatus> {
    if bounds.is_within(epsilon) {
        return Some(PfuncStatus::Converged);
    }
    match stability {
        Some(threshold) if bounds.ln_upper < threshold => Some(PfuncStatus::Unstable),
        _ => None,
    }
}

/// A partition function estimator of either method.
pub enum PfuncEstimator {
    MarkStar(MarkStarPfunc),
    Traditional(TraditionalPfunc),
}

impl PfuncEstimator {
    pub fn new(
        method: PfuncMethod,
        context: &StateContext,
        sequence: &Sequence,
        settings: &EstimatorSettings,
    ) -> Self {
        let rcs = sequence.make_rcs(context.space());
        match method {
            PfuncMethod::MarkStar => PfuncEstimator::MarkStar(MarkStarPfunc::new(context, rcs, settings)),
            PfuncMethod::Traditional => {
                PfuncEstimator::Traditional(TraditionalPfunc::new(context, rcs, settings))
            }
        }
    }

    /// Performs one refinement step and returns the resulting status.
    pub fn refine(&mut self, pool: &MinimizationPool) -> PfuncStatus {
        match self {
            PfuncEstimator::MarkStar(p) => p.refine(pool),
            PfuncEstimator::Traditional(p) => p.refine(pool),
        }
    }

    /// Refines until the estimator reaches a terminal status.
    pub fn refine_to_completion(&mut self, pool: &MinimizationPool) -> PfuncStatus {
        while self.status().can_continue() {
            self.refine(pool);
        }
        self.status()
    }

    pub fn state(&self) -> &PfuncState {
        match self {
            PfuncEstimator::MarkStar(p) => p.state(),
            PfuncEstimator::Traditional(p) => p.state(),
        }
    }

    pub fn status(&self) -> PfuncStatus {
        self.state().status
    }

    pub fn bounds(&self) -> ZBounds {
        self.state().bounds
    }

    /// Sets the natural-log threshold below which `Z_hi` marks the state unstable.
    pub fn set_stability_threshold(&mut self, ln_threshold: Option<f64>) {
        match self {
            PfuncEstimator::MarkStar(p) => p.set_stability_threshold(ln_threshold),
            PfuncEstimator::Traditional(p) => p.set_stability_threshold(ln_threshold),
        }
    }

    pub fn minimized_energy(&self, conformation: &[usize]) -> Option<f64> {
        match self {
            PfuncEstimator::MarkStar(p) => p.minimized_energy(conformation),
            PfuncEstimator::Traditional(p) => p.minimized_energy(conformation),
        }
    }

    /// Discards in-flight minimizations.
    pub fn abandon(&mut self) {
        match self {
            PfuncEstimator::MarkStar(p) => p.abandon(),
            PfuncEstimator::Traditional(p) => p.abandon(),
        }
    }
}
