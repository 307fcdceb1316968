use super::defaults::DefaultsConfig;
use super::file::FileConfig;
use crate::cli::{DesignArgs, MethodArg, TieBreakArg};
use crate::error::{CliError, Result};
use bbkstar::engine::config::{
    BbkStarConfig, BbkStarConfigBuilder, ConfidenceParams, PfuncMethod, TieBreak,
};
use clap::ValueEnum;
use std::path::PathBuf;
use std::str::FromStr;

pub struct AppConfig {
    pub design_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub ensemble_size: Option<usize>,
    pub core_config: BbkStarConfig,
}

impl From<MethodArg> for PfuncMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Markstar => PfuncMethod::MarkStar,
            MethodArg::Traditional => PfuncMethod::Traditional,
        }
    }
}

impl From<TieBreakArg> for TieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Forward => TieBreak::Forward,
            TieBreakArg::Reverse => TieBreak::Reverse,
        }
    }
}

/// Merges built-in defaults, the config file, command-line flags and `--set` overrides,
/// in increasing order of precedence.
pub fn build_config(args: &DesignArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = if let Some(config_path) = &args.config {
        FileConfig::from_file(config_path)?
    } else {
        FileConfig::default()
    };
    let overrides = apply_set_values(FileConfig::default(), &args.set_values)?;

    let search_file = file_config.search.unwrap_or_default();
    let search_set = overrides.search.unwrap_or_default();
    let ranking_file = file_config.ranking.unwrap_or_default();
    let ranking_set = overrides.ranking.unwrap_or_default();
    let cache_file = file_config.cache.unwrap_or_default();
    let cache_set = overrides.cache.unwrap_or_default();

    let num_best_sequences = search_set
        .num_best
        .or(args.num_best)
        .or(search_file.num_best)
        .unwrap_or(defaults.num_best_sequences);
    let epsilon = search_set
        .epsilon
        .or(args.epsilon)
        .or(search_file.epsilon)
        .unwrap_or(defaults.epsilon);
    let method = search_set
        .method
        .or(args.method)
        .or(search_file.method)
        .map(PfuncMethod::from)
        .unwrap_or_default();
    let confs_per_batch = search_set
        .confs_per_batch
        .or(args.confs_per_batch)
        .or(search_file.confs_per_batch)
        .unwrap_or(defaults.confs_per_batch);
    let max_minimizations = search_set
        .max_minimizations
        .or(args.max_minimizations)
        .or(search_file.max_minimizations);
    let stability_threshold = search_set
        .stability_threshold
        .or(args.stability_threshold)
        .or(search_file.stability_threshold);
    let max_mutations = search_set
        .max_mutations
        .or(args.max_mutations)
        .or(search_file.max_mutations);

    let confidence = ConfidenceParams {
        margin_log10: ranking_set
            .margin
            .or(args.margin)
            .or(ranking_file.margin)
            .unwrap_or(defaults.margin),
        require_converged_top: ranking_set
            .require_converged_top
            .or(ranking_file.require_converged_top)
            .unwrap_or(defaults.require_converged_top),
        tie_break: ranking_set
            .tie_break
            .or(args.tie_break)
            .or(ranking_file.tie_break)
            .map(TieBreak::from)
            .unwrap_or_default(),
        max_steps: ranking_set
            .max_steps
            .or(args.max_steps)
            .or(ranking_file.max_steps),
    };

    let matrix_cache_dir = if args.no_cache {
        None
    } else {
        let explicit_dir = cache_set
            .dir
            .or_else(|| args.cache_dir.clone())
            .or(cache_file.dir);
        let enabled = cache_set
            .enabled
            .or(cache_file.enabled)
            .unwrap_or(explicit_dir.is_some());
        match (enabled, explicit_dir) {
            (false, _) => None,
            (true, Some(dir)) => Some(dir),
            (true, None) => Some(PathBuf::from(&defaults.cache_dir)),
        }
    };

    let core_config = BbkStarConfigBuilder::new()
        .num_best_sequences(num_best_sequences)
        .epsilon(epsilon)
        .method(method)
        .confs_per_batch(confs_per_batch)
        .max_minimizations(max_minimizations)
        .stability_threshold(stability_threshold)
        .max_simultaneous_mutations(max_mutations)
        .confidence(confidence)
        .matrix_cache_dir(matrix_cache_dir)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(AppConfig {
        design_path: args.design.clone(),
        output_path: args.output.clone(),
        ensemble_size: args.ensemble,
        core_config,
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

fn parse_choice<T: ValueEnum>(key: &str, value: &str) -> Result<T> {
    T::from_str(value, true)
        .map_err(|_| CliError::Config(format!("Invalid choice for {}: {}", key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "search.num-best" => {
                config.search.get_or_insert_with(Default::default).num_best =
                    Some(parse_value(key, value, "integer")?);
            }
            "search.epsilon" => {
                config.search.get_or_insert_with(Default::default).epsilon =
                    Some(parse_value(key, value, "float")?);
            }
            "search.method" => {
                config.search.get_or_insert_with(Default::default).method =
                    Some(parse_choice(key, value)?);
            }
            "search.confs-per-batch" => {
                config
                    .search
                    .get_or_insert_with(Default::default)
                    .confs_per_batch = Some(parse_value(key, value, "integer")?);
            }
            "search.max-minimizations" => {
                config
                    .search
                    .get_or_insert_with(Default::default)
                    .max_minimizations = Some(parse_value(key, value, "integer")?);
            }
            "search.stability-threshold" => {
                config
                    .search
                    .get_or_insert_with(Default::default)
                    .stability_threshold = Some(parse_value(key, value, "float")?);
            }
            "search.max-mutations" => {
                config
                    .search
                    .get_or_insert_with(Default::default)
                    .max_mutations = Some(parse_value(key, value, "integer")?);
            }
            "ranking.margin" => {
                config.ranking.get_or_insert_with(Default::default).margin =
                    Some(parse_value(key, value, "float")?);
            }
            "ranking.require-converged-top" => {
                config
                    .ranking
                    .get_or_insert_with(Default::default)
                    .require_converged_top = Some(parse_value(key, value, "boolean")?);
            }
            "ranking.tie-break" => {
                config.ranking.get_or_insert_with(Default::default).tie_break =
                    Some(parse_choice(key, value)?);
            }
            "ranking.max-steps" => {
                config.ranking.get_or_insert_with(Default::default).max_steps =
                    Some(parse_value(key, value, "integer")?);
            }
            "cache.enabled" => {
                config.cache.get_or_insert_with(Default::default).enabled =
                    Some(parse_value(key, value, "boolean")?);
            }
            "cache.dir" => {
                config.cache.get_or_insert_with(Default::default).dir = Some(PathBuf::from(value));
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}
