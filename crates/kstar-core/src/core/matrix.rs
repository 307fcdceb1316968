use super::energy::EnergyModel;
use super::space::ConfSpace;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

const CACHE_FORMAT_VERSION: u32 = 2;

/// Errors related to loading or saving a cached energy matrix.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing the cache file.
    #[error("I/O error for energy matrix cache '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The cache file is not valid JSON for an energy matrix.
    #[error("Failed to parse energy matrix cache '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The cache file describes a different conformation space, model, layout or energies.
    #[error("Energy matrix cache '{path}' does not match the current design: {reason}")]
    Mismatch { path: PathBuf, reason: String },
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("Energy matrix for '{space_id}' ({model}) is missing {missing} entries")]
    Incomplete {
        space_id: String,
        model: EnergyModel,
        missing: usize,
    },
}

/// Position name and rotamer ids of one position, in RC order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLayout {
    pub name: String,
    pub rotamers: Vec<String>,
}

/// Everything a cached matrix must agree on to be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixKey {
    pub space_id: String,
    pub model: EnergyModel,
    pub layout: Vec<PositionLayout>,
    /// Fingerprint of the energy backend the matrix was computed with.
    pub energies: Option<u64>,
}

impl MatrixKey {
    pub fn for_space(space: &ConfSpace, model: EnergyModel) -> Self {
        Self {
            space_id: space.id().to_string(),
            model,
            energies: None,
            layout: space
                .positions()
                .iter()
                .map(|p| PositionLayout {
                    name: p.name().to_string(),
                    rotamers: p.rcs().iter().map(|rc| rc.rotamer.clone()).collect(),
                })
                .collect(),
        }
    }

    pub fn with_energies(mut self, fingerprint: Option<u64>) -> Self {
        self.energies = fingerprint;
        self
    }

    fn num_rcs(&self) -> Vec<usize> {
        self.layout.iter().map(|p| p.rotamers.len()).collect()
    }
}

/// Flat offsets of single and pair cells.
///
/// Pairs are stored once per unordered position pair `(i, j)` with `i > j`, as an
/// `n_i x n_j` block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MatrixIndex {
    num_rcs: Vec<usize>,
    single_offsets: Vec<usize>,
    pair_offsets: Vec<usize>,
    num_singles: usize,
    num_pairs: usize,
}

impl MatrixIndex {
    fn new(num_rcs: Vec<usize>) -> Self {
        let mut single_offsets = Vec::with_capacity(num_rcs.len());
        let mut num_singles = 0;
        for &n in &num_rcs {
            single_offsets.push(num_singles);
            num_singles += n;
        }

        let mut pair_offsets = Vec::new();
        let mut num_pairs = 0;
        for i in 0..num_rcs.len() {
            for j in 0..i {
                pair_offsets.push(num_pairs);
                num_pairs += num_rcs[i] * num_rcs[j];
            }
        }

        Self {
            num_rcs,
            single_offsets,
            pair_offsets,
            num_singles,
            num_pairs,
        }
    }

    #[inline]
    fn single(&self, pos: usize, rc: usize) -> usize {
        debug_assert!(rc < self.num_rcs[pos]);
        self.single_offsets[pos] + rc
    }

    #[inline]
    fn pair(&self, pos1: usize, rc1: usize, pos2: usize, rc2: usize) -> usize {
        debug_assert_ne!(pos1, pos2);
        let (i, ri, j, rj) = if pos1 > pos2 {
            (pos1, rc1, pos2, rc2)
        } else {
            (pos2, rc2, pos1, rc1)
        };
        self.pair_offsets[i * (i - 1) / 2 + j] + ri * self.num_rcs[j] + rj
    }
}

#[derive(Serialize, Deserialize)]
struct MatrixFile {
    format_version: u32,
    key: MatrixKey,
    singles: Vec<f64>,
    pairs: Vec<f64>,
}

/// Read-only single and pair energies of one conformation space under one energy model.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyMatrix {
    key: MatrixKey,
    index: MatrixIndex,
    singles: Vec<f64>,
    pairs: Vec<f64>,
}

impl EnergyMatrix {
    pub fn key(&self) -> &MatrixKey {
        &self.key
    }

    pub fn model(&self) -> EnergyModel {
        self.key.model
    }

    pub fn num_positions(&self) -> usize {
        self.index.num_rcs.len()
    }

    pub fn num_rcs(&self, pos: usize) -> usize {
        self.index.num_rcs[pos]
    }

    #[inline]
    pub fn single(&self, pos: usize, rc: usize) -> f64 {
        self.singles[self.index.single(pos, rc)]
    }

    #[inline]
    pub fn pair(&self, pos1: usize, rc1: usize, pos2: usize, rc2: usize) -> f64 {
        self.pairs[self.index.pair(pos1, rc1, pos2, rc2)]
    }

    /// Sum of all single and pair terms of a full conformation.
    pub fn conformation_energy(&self, conformation: &[usize]) -> f64 {
        let mut energy = 0.0;
        for (i, &ri) in conformation.iter().enumerate() {
            energy += self.single(i, ri);
            for (j, &rj) in conformation.iter().enumerate().take(i) {
                energy += self.pair(i, ri, j, rj);
            }
        }
        energy
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let io_err = |source: io::Error| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = fs::File::create(path).map_err(io_err)?;
        let contents = MatrixFile {
            format_version: CACHE_FORMAT_VERSION,
            key: self.key.clone(),
            singles: self.singles.clone(),
            pairs: self.pairs.clone(),
        };
        serde_json::to_writer(BufWriter::new(file), &contents).map_err(|source| {
            CacheError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Loads a cached matrix, verifying it was built for `expected`.
    pub fn load(path: &Path, expected: &MatrixKey) -> Result<Self, CacheError> {
        let file = fs::File::open(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let contents: MatrixFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| CacheError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mismatch = |reason: String| CacheError::Mismatch {
            path: path.to_path_buf(),
            reason,
        };
        if contents.format_version != CACHE_FORMAT_VERSION {
            return Err(mismatch(format!(
                "format version {} (expected {})",
                contents.format_version, CACHE_FORMAT_VERSION
            )));
        }
        if contents.key.space_id != expected.space_id {
            return Err(mismatch(format!(
                "built for space '{}', expected '{}'",
                contents.key.space_id, expected.space_id
            )));
        }
        if contents.key.model != expected.model {
            return Err(mismatch(format!(
                "built for the {} model, expected {}",
                contents.key.model, expected.model
            )));
        }
        if contents.key.layout != expected.layout {
            return Err(mismatch("position or rotamer layout differs".to_string()));
        }
        if expected.energies.is_none() || contents.key.energies != expected.energies {
            return Err(mismatch("energy terms differ from the ones it was built with".to_string()));
        }

        let index = MatrixIndex::new(expected.num_rcs());
        if contents.singles.len() != index.num_singles || contents.pairs.len() != index.num_pairs {
            return Err(mismatch(format!(
                "holds {} singles and {} pairs, expected {} and {}",
                contents.singles.len(),
                contents.pairs.len(),
                index.num_singles,
                index.num_pairs
            )));
        }

        Ok(Self {
            key: contents.key,
            index,
            singles: contents.singles,
            pairs: contents.pairs,
        })
    }
}

/// An energy matrix under construction whose cells may be filled from many threads.
///
/// Each cell is written at most once: a second write to the same cell is discarded,
/// which makes merging duplicated or retried work idempotent.
#[derive(Debug)]
pub struct PendingMatrix {
    key: MatrixKey,
    index: MatrixIndex,
    singles: Vec<OnceLock<f64>>,
    pairs: Vec<OnceLock<f64>>,
}

impl PendingMatrix {
    pub fn new(space: &ConfSpace, model: EnergyModel) -> Self {
        Self::with_key(MatrixKey::for_space(space, model))
    }

    pub fn with_key(key: MatrixKey) -> Self {
        let index = MatrixIndex::new(key.num_rcs());
        Self {
            singles: (0..index.num_singles).map(|_| OnceLock::new()).collect(),
            pairs: (0..index.num_pairs).map(|_| OnceLock::new()).collect(),
            key,
            index,
        }
    }

    /// Stores a single energy; returns `false` if the cell was already filled.
    pub fn merge_single(&self, pos: usize, rc: usize, energy: f64) -> bool {
        self.singles[self.index.single(pos, rc)].set(energy).is_ok()
    }

    /// Stores a pair energy; returns `false` if the cell was already filled.
    pub fn merge_pair(&self, pos1: usize, rc1: usize, pos2: usize, rc2: usize, energy: f64) -> bool {
        self.pairs[self.index.pair(pos1, rc1, pos2, rc2)]
            .set(energy)
            .is_ok()
    }

    pub fn num_missing(&self) -> usize {
        self.singles
            .iter()
            .chain(&self.pairs)
            .filter(|cell| cell.get().is_none())
            .count()
    }

    pub fn finish(self) -> Result<EnergyMatrix, MatrixError> {
        let missing = self.num_missing();
        if missing > 0 {
            return Err(MatrixError::Incomplete {
                space_id: self.key.space_id,
                model: self.key.model,
                missing,
            });
        }
        let drain = |cells: Vec<OnceLock<f64>>| -> Vec<f64> {
            cells
                .into_iter()
                .map(|cell| cell.into_inner().unwrap_or(f64::NAN))
                .collect()
        };
        Ok(EnergyMatrix {
            singles: drain(self.singles),
            pairs: drain(self.pairs),
            key: self.key,
            index: self.index,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::space::Strand;
    use crate::core::space::tests::position;
    use tempfile::tempdir;

    pub(crate) fn filled_matrix(
        space: &ConfSpace,
        model: EnergyModel,
        single: impl Fn(usize, usize) -> f64,
        pair: impl Fn(usize, usize, usize, usize) -> f64,
    ) -> EnergyMatrix {
        let key = MatrixKey::for_space(space, model).with_energies(Some(1));
        let pending = PendingMatrix::with_key(key);
        for (i, p) in space.positions().iter().enumerate() {
            for r in 0..p.num_rcs() {
                pending.merge_single(i, r, single(i, r));
                for j in 0..i {
                    for s in 0..space.position(j).num_rcs() {
                        pending.merge_pair(i, r, j, s, pair(i, r, j, s));
                    }
                }
            }
        }
        pending.finish().unwrap()
    }

    fn space() -> ConfSpace {
        ConfSpace::new(
            "mat",
            vec![
                position("A1", Strand::Protein, &[("ALA", "a0"), ("ALA", "a1")]),
                position("A2", Strand::Protein, &[("SER", "s0"), ("SER", "s1"), ("THR", "t0")]),
                position("B1", Strand::Ligand, &[("LEU", "l0")]),
            ],
        )
        .unwrap()
    }

    fn sample(space: &ConfSpace) -> EnergyMatrix {
        filled_matrix(
            space,
            EnergyModel::Minimized,
            |i, r| -(i as f64) - 0.5 * r as f64,
            |i, r, j, s| (i * 100 + r * 10 + j) as f64 + 0.01 * s as f64,
        )
    }

    #[test]
    fn pair_lookup_is_symmetric() {
        let space = space();
        let m = sample(&space);
        assert_eq!(m.pair(2, 0, 1, 2), 200.0 + 1.0 + 0.02);
        assert_eq!(m.pair(1, 2, 2, 0), m.pair(2, 0, 1, 2));
        assert_eq!(m.pair(1, 1, 0, 1), 100.0 + 10.0 + 0.01);
        assert_eq!(m.single(1, 2), -2.0);
    }

    #[test]
    fn conformation_energy_sums_singles_and_pairs() {
        let space = space();
        let m = sample(&space);
        let expected = m.single(0, 1)
            + m.single(1, 0)
            + m.pair(1, 0, 0, 1)
            + m.single(2, 0)
            + m.pair(2, 0, 0, 1)
            + m.pair(2, 0, 1, 0);
        assert_eq!(m.conformation_energy(&[1, 0, 0]), expected);
    }

    #[test]
    fn merge_is_first_writer_wins() {
        let space = space();
        let pending = PendingMatrix::new(&space, EnergyModel::Rigid);
        assert!(pending.merge_single(0, 1, 3.0));
        assert!(!pending.merge_single(0, 1, 4.0));
        assert!(pending.merge_pair(0, 0, 1, 1, 2.0));
        assert!(!pending.merge_pair(1, 1, 0, 0, 9.0));
        assert_eq!(pending.num_missing(), 6 + 11 - 2);
    }

    #[test]
    fn finish_fails_when_cells_are_missing() {
        let space = space();
        let pending = PendingMatrix::new(&space, EnergyModel::Rigid);
        pending.merge_single(0, 0, 1.0);
        let err = pending.finish().unwrap_err();
        assert_eq!(
            err,
            MatrixError::Incomplete {
                space_id: "mat".into(),
                model: EnergyModel::Rigid,
                missing: 16,
            }
        );
    }

    #[test]
    fn cache_round_trip_preserves_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("emat.json");
        let space = space();
        let m = sample(&space);
        m.save(&path).unwrap();
        let loaded = EnergyMatrix::load(&path, m.key()).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn load_rejects_other_model_and_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emat.json");
        let space = space();
        let m = sample(&space);
        m.save(&path).unwrap();

        let rigid = MatrixKey::for_space(&space, EnergyModel::Rigid);
        assert!(matches!(
            EnergyMatrix::load(&path, &rigid),
            Err(CacheError::Mismatch { .. })
        ));

        let mut reordered = m.key().clone();
        reordered.layout[1].rotamers.swap(0, 1);
        assert!(matches!(
            EnergyMatrix::load(&path, &reordered),
            Err(CacheError::Mismatch { .. })
        ));
    }

    #[test]
    fn load_rejects_other_or_unknown_energies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emat.json");
        let space = space();
        let m = sample(&space);
        m.save(&path).unwrap();

        let edited = m.key().clone().with_energies(Some(2));
        let err = EnergyMatrix::load(&path, &edited).unwrap_err();
        assert!(err.to_string().contains("energy terms differ"));

        let unknown = m.key().clone().with_energies(None);
        assert!(matches!(
            EnergyMatrix::load(&path, &unknown),
            Err(CacheError::Mismatch { .. })
        ));
    }

    #[test]
    fn load_reports_missing_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let space = space();
        let key = MatrixKey::for_space(&space, EnergyModel::Minimized);

        let missing = EnergyMatrix::load(&dir.path().join("absent.json"), &key).unwrap_err();
        assert!(missing.is_not_found());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(matches!(
            EnergyMatrix::load(&corrupt, &key),
            Err(CacheError::Parse { .. })
        ));
    }
}
