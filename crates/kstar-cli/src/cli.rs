use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "BBK* CLI - Rank protein sequences by provably bounded K* binding scores.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for matrix construction and minimization.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run BBK* on a design and report the best sequences.
    Design(DesignArgs),
    /// Summarize the positions, sequences and conformations of a design.
    Inspect(InspectArgs),
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MethodArg {
    /// Bounding tree refined where its bounds differ most.
    Markstar,
    /// Conformations minimized in A* order.
    Traditional,
}

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TieBreakArg {
    Forward,
    Reverse,
}

/// Arguments for the `design` subcommand.
#[derive(Args, Debug)]
pub struct DesignArgs {
    // --- Core Arguments ---
    /// Path to the design file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub design: PathBuf,

    /// Path to a run configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the score table to this path as tab-separated values.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the K lowest-energy complex conformations of each ranked sequence.
    #[arg(short, long, value_name = "K")]
    pub ensemble: Option<usize>,

    // --- Search Overrides ---
    /// Override the number of top sequences to certify.
    #[arg(short, long, value_name = "INT")]
    pub num_best: Option<usize>,

    /// Override the partition function accuracy target.
    #[arg(long, value_name = "FLOAT")]
    pub epsilon: Option<f64>,

    /// Override the partition function method.
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// Override the number of minimizations merged per refinement step.
    #[arg(long, value_name = "INT")]
    pub confs_per_batch: Option<usize>,

    /// Override the minimization budget of each partition function.
    #[arg(long, value_name = "INT")]
    pub max_minimizations: Option<usize>,

    /// Override the stability threshold relative to wild type, in kcal/mol.
    #[arg(long, value_name = "FLOAT")]
    pub stability_threshold: Option<f64>,

    /// Override the maximum number of simultaneous mutations.
    #[arg(long, value_name = "INT")]
    pub max_mutations: Option<usize>,

    // --- Ranking Overrides ---
    /// Override the required separation between top and other sequences, in log10 units.
    #[arg(long, value_name = "FLOAT")]
    pub margin: Option<f64>,

    /// Override the order in which equally ranked sequences are refined.
    #[arg(long, value_enum)]
    pub tie_break: Option<TieBreakArg>,

    /// Override the maximum number of sequence refinement steps.
    #[arg(long, value_name = "INT")]
    pub max_steps: Option<usize>,

    // --- Cache ---
    /// Override the directory used to cache energy matrices.
    #[arg(long, value_name = "PATH", conflicts_with = "no_cache")]
    pub cache_dir: Option<PathBuf>,

    /// Disable energy matrix caching, even if the config file enables it.
    #[arg(long)]
    pub no_cache: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S search.epsilon=0.05
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `inspect` subcommand.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to the design file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub design: PathBuf,

    /// Count sequences with at most this many mutations.
    #[arg(long, value_name = "INT")]
    pub max_mutations: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_design_command_with_overrides() {
        let cli = Cli::parse_from([
            "bbkstar",
            "-vv",
            "-j",
            "4",
            "design",
            "--design",
            "d.toml",
            "--epsilon",
            "0.05",
            "--method",
            "traditional",
            "--tie-break",
            "reverse",
            "-S",
            "search.num-best=3",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        let Commands::Design(args) = cli.command else {
            panic!("expected the design command");
        };
        assert_eq!(args.design, PathBuf::from("d.toml"));
        assert_eq!(args.epsilon, Some(0.05));
        assert_eq!(args.method, Some(MethodArg::Traditional));
        assert_eq!(args.tie_break, Some(TieBreakArg::Reverse));
        assert_eq!(args.set_values, vec!["search.num-best=3".to_string()]);
    }

    #[test]
    fn cache_dir_conflicts_with_no_cache() {
        let result = Cli::try_parse_from([
            "bbkstar",
            "design",
            "-d",
            "d.toml",
            "--cache-dir",
            "cache",
            "--no-cache",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["bbkstar", "-q", "-v", "inspect", "-d", "d.toml"]).is_err());
    }
}
