use crate::core::energy::{ConfEnergyCalculator, EnergyModel, MinimizationFailure};
use crate::core::matrix::{EnergyMatrix, MatrixKey, PendingMatrix};
use crate::core::space::ConfSpace;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy)]
enum WorkUnit {
    Single { pos: usize },
    Pair { pos1: usize, pos2: usize },
}

/// Path of the cached matrix for one conformation space and energy model.
pub fn cache_path(dir: &Path, space_id: &str, model: EnergyModel) -> PathBuf {
    dir.join(format!("emat.{space_id}.{model}.json"))
}

/// Loads the energy matrix of `space` from the cache, or computes and caches it.
///
/// A cache file that cannot be read or does not match the current space and energies is
/// discarded with a warning. Failing to write the cache only produces a warning. Backends
/// without a fingerprint are never cached.
#[instrument(skip_all, name = "energy_matrix_task", fields(space = space.id(), model = %model))]
pub fn run(
    space: &ConfSpace,
    calculator: &dyn ConfEnergyCalculator,
    model: EnergyModel,
    cache_dir: Option<&Path>,
    reporter: &ProgressReporter,
) -> Result<EnergyMatrix, EngineError> {
    let fingerprint = calculator.fingerprint();
    let key = MatrixKey::for_space(space, model).with_energies(fingerprint);
    let path = match (cache_dir, fingerprint) {
        (Some(dir), Some(_)) => Some(cache_path(dir, space.id(), model)),
        (Some(_), None) => {
            warn!("Energy backend has no fingerprint; not caching its energy matrix.");
            None
        }
        (None, _) => None,
    };

    if let Some(path) = &path {
        match EnergyMatrix::load(path, &key) {
            Ok(matrix) => {
                info!(path = %path.display(), "Loaded energy matrix from cache.");
                return Ok(matrix);
            }
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "No cached energy matrix found.");
            }
            Err(e) => warn!("Discarding energy matrix cache: {}", e),
        }
    }

    let matrix = compute(space, calculator, key, reporter)?;

    if let Some(path) = &path {
        match matrix.save(path) {
            Ok(()) => debug!(path = %path.display(), "Saved energy matrix to cache."),
            Err(e) => warn!("Failed to save energy matrix cache: {}", e),
        }
    }
    Ok(matrix)
}

fn compute(
    space: &ConfSpace,
    calculator: &dyn ConfEnergyCalculator,
    key: MatrixKey,
    reporter: &ProgressReporter,
) -> Result<EnergyMatrix, EngineError> {
    let model = key.model;
    info!("Computing energy matrix.");
    reporter.report(Progress::PhaseStart {
        name: "Energy Matrix",
    });

    let n = space.num_positions();
    let work_list: Vec<WorkUnit> = (0..n)
        .map(|pos| WorkUnit::Single { pos })
        .chain(
            (0..n)
                .tuple_combinations()
                .map(|(pos2, pos1)| WorkUnit::Pair { pos1, pos2 }),
        )
        .collect();

    let pending = PendingMatrix::with_key(key);

    reporter.report(Progress::TaskStart {
        total_steps: work_list.len() as u64,
    });

    #[cfg(not(feature = "parallel"))]
    let iterator = work_list.iter();

    #[cfg(feature = "parallel")]
    let iterator = work_list.par_iter();

    let results: Vec<Result<(), MinimizationFailure>> = iterator
        .map(|unit| {
            let result = compute_unit(*unit, space, calculator, model, &pending);
            reporter.report(Progress::TaskIncrement);
            result
        })
        .collect();

    reporter.report(Progress::TaskFinish);

    for result in results {
        result?;
    }
    let matrix = pending.finish()?;

    info!(units = work_list.len(), "Energy matrix computed.");
    reporter.report(Progress::PhaseFinish);
    Ok(matrix)
}

fn compute_unit(
    unit: WorkUnit,
    space: &ConfSpace,
    calculator: &dyn ConfEnergyCalculator,
    model: EnergyModel,
    pending: &PendingMatrix,
) -> Result<(), MinimizationFailure> {
    match unit {
        WorkUnit::Single { pos } => {
            for rc in 0..space.position(pos).num_rcs() {
                let energy = calculator.single_energy(space, pos, rc, model)?;
                check_finite(space, &[(pos, rc)], energy)?;
                pending.merge_single(pos, rc, energy);
            }
        }
        WorkUnit::Pair { pos1, pos2 } => {
            for rc1 in 0..space.position(pos1).num_rcs() {
                for rc2 in 0..space.position(pos2).num_rcs() {
                    let energy = calculator.pair_energy(space, pos1, rc1, pos2, rc2, model)?;
                    check_finite(space, &[(pos1, rc1), (pos2, rc2)], energy)?;
                    pending.merge_pair(pos1, rc1, pos2, rc2, energy);
                }
            }
        }
    }
    Ok(())
}

fn check_finite(space: &ConfSpace, terms: &[(usize, usize)], energy: f64) -> Result<(), MinimizationFailure> {
    if energy.is_finite() {
        return Ok(());
    }
    let rcs: Vec<usize> = terms.iter().map(|&(_, rc)| rc).collect();
    let positions: Vec<&str> = terms.iter().map(|&(pos, _)| space.position(pos).name()).collect();
    Err(MinimizationFailure::new(
        space.id(),
        &rcs,
        format!("non-finite matrix energy {energy} at positions {positions:?}"),
    ))
}
