use super::kstar::KStarBound;
use super::pfunc::{PfuncState, PfuncStatus};
use crate::core::sequence::Sequence;
use std::fmt;

/// Lifecycle of one candidate sequence in the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceStatus {
    Unstarted,
    Bounding,
    Converged,
    /// Every state is settled but at least one ran out of work before epsilon.
    Exhausted,
    /// An unbound state fell below the stability threshold.
    Unstable,
    Failed,
}

impl SequenceStatus {
    /// Derives the sequence status from the statuses of its three states.
    pub fn aggregate(states: [PfuncStatus; 3]) -> Self {
        if states.contains(&PfuncStatus::Failed) {
            SequenceStatus::Failed
        } else if states.contains(&PfuncStatus::Unstable) {
            SequenceStatus::Unstable
        } else if states.contains(&PfuncStatus::Estimating) {
            SequenceStatus::Bounding
        } else if states.contains(&PfuncStatus::Exhausted) {
            SequenceStatus::Exhausted
        } else {
            SequenceStatus::Converged
        }
    }

    /// Whether the sequence still competes for a place in the ranking.
    pub fn is_viable(&self) -> bool {
        !matches!(self, SequenceStatus::Unstable | SequenceStatus::Failed)
    }

    pub fn is_refinable(&self) -> bool {
        matches!(self, SequenceStatus::Unstarted | SequenceStatus::Bounding)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_refinable()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Unstarted => "unstarted",
            SequenceStatus::Bounding => "bounding",
            SequenceStatus::Converged => "converged",
            SequenceStatus::Exhausted => "exhausted",
            SequenceStatus::Unstable => "unstable",
            SequenceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of one candidate at a point in the run.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSnapshot {
    /// Position of the sequence in creation order.
    pub index: usize,
    pub sequence: Sequence,
    pub status: SequenceStatus,
    pub kstar: KStarBound,
    pub protein: Option<PfuncState>,
    pub ligand: Option<PfuncState>,
    pub complex: Option<PfuncState>,
}

/// One entry of the final ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSequence {
    /// 1-based rank, best first.
    pub rank: usize,
    pub sequence: Sequence,
    pub protein_sequence: Sequence,
    pub ligand_sequence: Sequence,
    pub kstar: KStarBound,
    pub status: SequenceStatus,
    pub protein: PfuncState,
    pub ligand: PfuncState,
    pub complex: PfuncState,
}

impl ScoredSequence {
    /// Whether every partition function reached epsilon.
    pub fn is_converged(&self) -> bool {
        self.status == SequenceStatus::Converged
    }
}
