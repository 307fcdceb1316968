use crate::cli::DesignArgs;
use crate::config::build_config;
use crate::error::{CliError, Result};
use crate::utils::output;
use crate::utils::progress::CliProgressHandler;
use bbkstar::core::energy::ConfEnergyCalculator;
use bbkstar::core::io::design::DesignDefinition;
use bbkstar::core::space::StateKind;
use bbkstar::engine::pool::MinimizationPool;
use bbkstar::engine::progress::ProgressReporter;
use bbkstar::workflows;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(args: DesignArgs, threads: usize) -> Result<()> {
    info!("Merging configuration from defaults, file and command line...");
    let app_config = build_config(&args)?;

    info!("Loading design from {:?}", &app_config.design_path);
    let design = DesignDefinition::from_path(&app_config.design_path).map_err(|e| {
        CliError::FileParsing {
            path: app_config.design_path.clone(),
            source: e.into(),
        }
    })?;
    let calculator: Arc<dyn ConfEnergyCalculator> = Arc::new(design.energies);

    let pool = MinimizationPool::new(threads)?;
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Starting BBK* on '{}' for the best {} sequence(s)...",
        design.space.name(),
        app_config.core_config.num_best_sequences
    );
    info!("Invoking the core design workflow...");

    let run = workflows::design::run(
        &design.space,
        calculator,
        &app_config.core_config,
        &pool,
        &reporter,
    )?;

    info!(
        "Workflow finished, received {} ranked sequence(s).",
        run.sequences.len()
    );

    if run.sequences.is_empty() {
        warn!("Workflow completed but no sequence survived.");
        println!("Warning: BBK* finished but every sequence failed or was destabilized.");
        return Ok(());
    }

    println!();
    print!("{}", output::format_ranking(&run.sequences));
    if run.sequences.iter().any(|s| !s.is_converged()) {
        println!("  (* bounds did not reach epsilon)");
    }

    if let Some(k) = app_config.ensemble_size {
        for scored in &run.sequences {
            let confs =
                workflows::analysis::ensemble(&run.driver, &scored.sequence, StateKind::Complex, k);
            println!("\n  Ensemble of {} (lower bound, minimized, rotamers):", scored.sequence);
            print!("{}", output::format_ensemble(&confs));
        }
    }

    if let Some(path) = &app_config.output_path {
        info!("Writing score table to {:?}", path);
        output::write_score_table_to_path(path, &run.sequences)?;
        println!("\n✓ Score table written to: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const DESIGN: &str = r#"
name = "cli"

[[position]]
name = "P1"
strand = "protein"
wild-type = "ALA"
rc = [
    { id = "a0", res-type = "ALA" },
    { id = "g0", res-type = "GLY", rigid = 1.0, minimized = 0.5 },
]

[[position]]
name = "L1"
strand = "ligand"
wild-type = "SER"
rc = [{ id = "s0", res-type = "SER" }]

[[pair]]
a = "P1/a0"
b = "L1/s0"
rigid = -4.0
minimized = -5.0

[[pair]]
a = "P1/g0"
b = "L1/s0"
rigid = 0.0
minimized = -0.5
"#;

    fn design_args(dir: &Path) -> DesignArgs {
        let design = dir.join("design.toml");
        fs::write(&design, DESIGN).unwrap();
        DesignArgs {
            design,
            config: None,
            output: Some(dir.join("scores.tsv")),
            ensemble: Some(2),
            num_best: Some(1),
            epsilon: Some(0.1),
            method: None,
            confs_per_batch: None,
            max_minimizations: None,
            stability_threshold: None,
            max_mutations: None,
            margin: None,
            tie_break: None,
            max_steps: None,
            cache_dir: Some(dir.join("cache")),
            no_cache: false,
            set_values: vec![],
        }
    }

    #[test]
    fn design_writes_score_table_and_cache() {
        let dir = tempdir().unwrap();
        let args = design_args(dir.path());
        run(args, 2).expect("design run");

        let table = fs::read_to_string(dir.path().join("scores.tsv")).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1\tALA SER\tconverged"));
        assert_eq!(fs::read_dir(dir.path().join("cache")).unwrap().count(), 6);
    }

    #[test]
    fn missing_design_file_is_a_parsing_error() {
        let dir = tempdir().unwrap();
        let mut args = design_args(dir.path());
        args.design = dir.path().join("absent.toml");
        assert!(matches!(run(args, 1), Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn too_many_requested_sequences_fail_before_search() {
        let dir = tempdir().unwrap();
        let mut args = design_args(dir.path());
        args.num_best = Some(3);
        assert!(matches!(run(args, 1), Err(CliError::Engine(_))));
        assert!(!dir.path().join("scores.tsv").exists());
        assert!(!dir.path().join("cache").exists());
    }
}
