use crate::cli::{MethodArg, TieBreakArg};
use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSearchConfig {
    pub num_best: Option<usize>,
    pub epsilon: Option<f64>,
    pub method: Option<MethodArg>,
    pub confs_per_batch: Option<usize>,
    pub max_minimizations: Option<usize>,
    pub stability_threshold: Option<f64>,
    pub max_mutations: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRankingConfig {
    pub margin: Option<f64>,
    pub require_converged_top: Option<bool>,
    pub tie_break: Option<TieBreakArg>,
    pub max_steps: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileCacheConfig {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
}

/// Run configuration as written in a TOML file; every key is optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub search: Option<FileSearchConfig>,
    pub ranking: Option<FileRankingConfig>,
    pub cache: Option<FileCacheConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading configuration file: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_every_section() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [search]
            num-best = 3
            epsilon = 0.1
            method = "traditional"
            stability-threshold = 5.0

            [ranking]
            margin = 0.5
            tie-break = "reverse"

            [cache]
            dir = "matrices"
            "#
        )
        .unwrap();

        let config = FileConfig::from_file(file.path()).unwrap();
        let search = config.search.unwrap();
        assert_eq!(search.num_best, Some(3));
        assert_eq!(search.method, Some(MethodArg::Traditional));
        assert_eq!(search.stability_threshold, Some(5.0));
        assert!(search.confs_per_batch.is_none());
        let ranking = config.ranking.unwrap();
        assert_eq!(ranking.tie_break, Some(TieBreakArg::Reverse));
        assert_eq!(config.cache.unwrap().dir, Some(PathBuf::from("matrices")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[search]\nepsilonn = 0.1\n").unwrap();
        assert!(matches!(
            FileConfig::from_file(file.path()),
            Err(CliError::FileParsing { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_parsing_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }
}
