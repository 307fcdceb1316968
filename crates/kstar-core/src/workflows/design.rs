use crate::core::energy::ConfEnergyCalculator;
use crate::core::sequence::count_sequences;
use crate::core::space::DesignSpace;
use crate::engine::bbkstar::{BbkStar, check_num_best};
use crate::engine::config::BbkStarConfig;
use crate::engine::context::StateContexts;
use crate::engine::error::EngineError;
use crate::engine::pool::MinimizationPool;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::ScoredSequence;
use std::sync::Arc;
use tracing::{info, instrument};

/// The outcome of a design run.
///
/// The driver is kept so its estimators can be queried after the run.
pub struct DesignRun<'a> {
    /// Top sequences, best first.
    pub sequences: Vec<ScoredSequence>,
    pub driver: BbkStar<'a>,
}

#[instrument(skip_all, name = "design_workflow", fields(design = design.name()))]
pub fn run<'a>(
    design: &DesignSpace,
    calculator: Arc<dyn ConfEnergyCalculator>,
    config: &'a BbkStarConfig,
    pool: &'a MinimizationPool,
    reporter: &'a ProgressReporter<'a>,
) -> Result<DesignRun<'a>, EngineError> {
    // === Phase 0: Validate the request against the sequence space ===
    let num_sequences = count_sequences(design.complex(), config.max_simultaneous_mutations);
    check_num_best(config.num_best_sequences, num_sequences)?;
    info!(
        sequences = num_sequences,
        positions = design.complex().num_positions(),
        conformations = design.complex().num_conformations(),
        "Starting design."
    );

    // === Phase 1: Energy matrices for every state ===
    let contexts = StateContexts::build(
        design,
        calculator,
        config.matrix_cache_dir.as_deref(),
        reporter,
    )?;

    // === Phase 2: Sequence search ===
    let mut driver = BbkStar::new(design, contexts, config, pool, reporter)?;
    let sequences = driver.run();

    reporter.report(Progress::Message(format!(
        "Ranked {} of {} sequences in {} steps; {} reached.",
        sequences.len(),
        num_sequences,
        driver.num_steps(),
        driver.num_candidates()
    )));
    info!(ranked = sequences.len(), "Design finished.");

    Ok(DesignRun { sequences, driver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::EnergyBounds;
    use crate::core::io::design::DesignDefinition;
    use crate::engine::config::{BbkStarConfigBuilder, ConfigError};
    use tempfile::tempdir;

    const DESIGN: &str = r#"
name = "wf"

[[position]]
name = "P1"
strand = "protein"
wild-type = "ALA"
rc = [
    { id = "a0", res-type = "ALA" },
    { id = "a1", res-type = "ALA", rigid = 0.5, minimized = 0.0 },
    { id = "v0", res-type = "VAL" },
]

[[position]]
name = "L1"
strand = "ligand"
wild-type = "SER"
rc = [{ id = "s0", res-type = "SER" }, { id = "s1", res-type = "SER", rigid = 0.2, minimized = -0.1 }]

[[pair]]
a = "P1/v0"
b = "L1/s0"
rigid = -2.0
minimized = -3.0
"#;

    #[test]
    fn configuration_is_checked_before_matrices_are_built() {
        let design = DesignDefinition::from_toml_str(DESIGN).unwrap();
        let dir = tempdir().unwrap();
        let config = BbkStarConfigBuilder::new()
            .num_best_sequences(5)
            .epsilon(0.1)
            .matrix_cache_dir(Some(dir.path().to_path_buf()))
            .build()
            .unwrap();
        let pool = MinimizationPool::new(1).unwrap();
        let reporter = ProgressReporter::new();
        let result = run(&design.space, Arc::new(design.energies), &config, &pool, &reporter);
        assert!(matches!(
            result,
            Err(EngineError::Config {
                source: ConfigError::InvalidParameter { .. }
            })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn design_ranks_and_caches() {
        let design = DesignDefinition::from_toml_str(DESIGN).unwrap();
        let dir = tempdir().unwrap();
        let config = BbkStarConfigBuilder::new()
            .num_best_sequences(2)
            .epsilon(0.05)
            .matrix_cache_dir(Some(dir.path().to_path_buf()))
            .build()
            .unwrap();
        let pool = MinimizationPool::new(2).unwrap();
        let reporter = ProgressReporter::new();
        let outcome = run(&design.space, Arc::new(design.energies), &config, &pool, &reporter).unwrap();

        let ranked: Vec<String> = outcome.sequences.iter().map(|s| s.sequence.to_string()).collect();
        assert_eq!(ranked, vec!["VAL SER", "ALA SER"]);
        assert!(outcome.sequences.iter().all(|s| s.is_converged()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
    }

    #[test]
    fn rerun_with_edited_energies_uses_fresh_matrices() {
        let mut design = DesignDefinition::from_toml_str(DESIGN).unwrap();
        let dir = tempdir().unwrap();
        let config = BbkStarConfigBuilder::new()
            .num_best_sequences(2)
            .epsilon(0.05)
            .matrix_cache_dir(Some(dir.path().to_path_buf()))
            .build()
            .unwrap();
        let pool = MinimizationPool::new(1).unwrap();
        let reporter = ProgressReporter::new();
        let first = run(&design.space, Arc::new(design.energies.clone()), &config, &pool, &reporter).unwrap();
        assert_eq!(first.sequences[0].sequence.to_string(), "VAL SER");

        // Same positions and RCs, so only the energy values tell the caches apart.
        design
            .energies
            .set_pair("P1", "v0", "L1", "s0", EnergyBounds::new(3.0, 2.0));
        let second = run(&design.space, Arc::new(design.energies), &config, &pool, &reporter).unwrap();
        let ranked: Vec<String> = second.sequences.iter().map(|s| s.sequence.to_string()).collect();
        assert_eq!(ranked, vec!["ALA SER", "VAL SER"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
    }
}
