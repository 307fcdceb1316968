use super::config::{EstimatorSettings, PfuncMethod};
use super::error::EngineError;
use super::pfunc::PfuncEstimator;
use super::progress::ProgressReporter;
use super::search::{ConfAStar, ScoringStrategy};
use super::tasks::energy_matrix;
use crate::core::energy::{ConfEnergyCalculator, EnergyModel};
use crate::core::matrix::EnergyMatrix;
use crate::core::sequence::Sequence;
use crate::core::space::{ConfSpace, DesignSpace, StateKind};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything needed to search and bound one state of a design.
///
/// Built once per state, then shared by reference with every estimator of that state.
pub struct StateContext {
    kind: StateKind,
    space: Arc<ConfSpace>,
    calculator: Arc<dyn ConfEnergyCalculator>,
    minimized: Arc<EnergyMatrix>,
    rigid: Arc<EnergyMatrix>,
}

impl StateContext {
    pub fn new(
        kind: StateKind,
        space: Arc<ConfSpace>,
        calculator: Arc<dyn ConfEnergyCalculator>,
        minimized: EnergyMatrix,
        rigid: EnergyMatrix,
    ) -> Self {
        debug_assert_eq!(minimized.model(), EnergyModel::Minimized);
        debug_assert_eq!(rigid.model(), EnergyModel::Rigid);
        Self {
            kind,
            space,
            calculator,
            minimized: Arc::new(minimized),
            rigid: Arc::new(rigid),
        }
    }

    /// Computes (or loads from `cache_dir`) both energy matrices of `space`.
    pub fn build(
        kind: StateKind,
        space: Arc<ConfSpace>,
        calculator: Arc<dyn ConfEnergyCalculator>,
        cache_dir: Option<&Path>,
        reporter: &ProgressReporter,
    ) -> Result<Self, EngineError> {
        info!(state = %kind, positions = space.num_positions(), "Preparing state.");
        let minimized = energy_matrix::run(
            &space,
            calculator.as_ref(),
            EnergyModel::Minimized,
            cache_dir,
            reporter,
        )?;
        let rigid = energy_matrix::run(
            &space,
            calculator.as_ref(),
            EnergyModel::Rigid,
            cache_dir,
            reporter,
        )?;
        Ok(Self::new(kind, space, calculator, minimized, rigid))
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn space(&self) -> &Arc<ConfSpace> {
        &self.space
    }

    pub fn calculator(&self) -> &Arc<dyn ConfEnergyCalculator> {
        &self.calculator
    }

    pub fn minimized_matrix(&self) -> &Arc<EnergyMatrix> {
        &self.minimized
    }

    pub fn rigid_matrix(&self) -> &Arc<EnergyMatrix> {
        &self.rigid
    }

    pub fn matrix(&self, model: EnergyModel) -> &Arc<EnergyMatrix> {
        match model {
            EnergyModel::Minimized => &self.minimized,
            EnergyModel::Rigid => &self.rigid,
        }
    }

    /// A fresh conformation search over the RCs `sequence` allows.
    pub fn make_search(&self, sequence: &Sequence, strategy: ScoringStrategy) -> ConfAStar {
        let matrix = Arc::clone(self.matrix(strategy.energy_model()));
        ConfAStar::new(matrix, sequence.make_rcs(&self.space))
    }

    pub fn make_estimator(
        &self,
        sequence: &Sequence,
        method: PfuncMethod,
        settings: &EstimatorSettings,
    ) -> PfuncEstimator {
        PfuncEstimator::new(method, self, sequence, settings)
    }
}

/// The three state contexts of a design.
pub struct StateContexts {
    pub protein: StateContext,
    pub ligand: StateContext,
    pub complex: StateContext,
}

impl StateContexts {
    pub fn build(
        design: &DesignSpace,
        calculator: Arc<dyn ConfEnergyCalculator>,
        cache_dir: Option<&Path>,
        reporter: &ProgressReporter,
    ) -> Result<Self, EngineError> {
        let build = |kind: StateKind| {
            StateContext::build(
                kind,
                Arc::clone(design.state(kind)),
                Arc::clone(&calculator),
                cache_dir,
                reporter,
            )
        };
        Ok(Self {
            protein: build(StateKind::Protein)?,
            ligand: build(StateKind::Ligand)?,
            complex: build(StateKind::Complex)?,
        })
    }

    pub fn get(&self, kind: StateKind) -> &StateContext {
        match kind {
            StateKind::Protein => &self.protein,
            StateKind::Ligand => &self.ligand,
            StateKind::Complex => &self.complex,
        }
    }
}
