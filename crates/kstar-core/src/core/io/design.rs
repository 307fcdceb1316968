use crate::core::energy::{EnergyBounds, TabulatedEnergies};
use crate::core::space::{DesignSpace, Position, ResidueConf, SpaceError, Strand};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Represents errors that can occur while loading a design file.
///
/// A design file describes the mutable positions of both binding partners, their allowed
/// residue conformations and the tabulated energies used by [`TabulatedEnergies`].
#[derive(Debug, Error)]
pub enum DesignError {
    /// Indicates that the design file could not be read from disk.
    #[error("File I/O error for '{path}': {source}")]
    Io {
        /// The path to the file that could not be read.
        path: String,
        /// The underlying I/O error that occurred.
        source: std::io::Error,
    },
    /// Indicates that the design file content is not valid TOML or does not match
    /// the expected layout.
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        /// The path to the file that could not be parsed.
        path: String,
        /// The underlying TOML parsing error that occurred.
        source: toml::de::Error,
    },
    /// Indicates that the positions do not form a valid design space.
    ///
    /// This covers duplicate position names or rotamer ids, positions without any
    /// conformations, a wild type without conformations and a strand without positions.
    #[error("Invalid design space: {0}")]
    Space(#[from] SpaceError),
    /// Indicates that a pair entry names a position or rotamer that does not exist.
    ///
    /// Pair endpoints are written as `"<position>/<rotamer>"`.
    #[error("Pair entry references unknown residue conformation '{0}'")]
    UnknownReference(String),
    /// Indicates that an energy entry cannot bound continuous minimization.
    ///
    /// Every minimized term must be finite and no greater than its rigid counterpart,
    /// otherwise the matrices would not bound the minimized energies.
    #[error("Invalid energy for {entry}: {reason}")]
    InvalidEnergy { entry: String, reason: String },
    /// Indicates that the interpolation coupling is outside `[0, 1]`.
    #[error("Energy coupling must lie in [0, 1], got {0}")]
    InvalidCoupling(f64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDesign {
    name: String,
    #[serde(default)]
    energy: RawEnergySettings,
    #[serde(rename = "position", default)]
    positions: Vec<RawPosition>,
    #[serde(rename = "pair", default)]
    pairs: Vec<RawPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawEnergySettings {
    #[serde(default = "default_coupling")]
    coupling: f64,
}

impl Default for RawEnergySettings {
    fn default() -> Self {
        Self {
            coupling: default_coupling(),
        }
    }
}

fn default_coupling() -> f64 {
    TabulatedEnergies::DEFAULT_COUPLING
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPosition {
    name: String,
    strand: Strand,
    wild_type: String,
    #[serde(rename = "rc", default)]
    rcs: Vec<RawRc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawRc {
    id: String,
    res_type: String,
    #[serde(default)]
    rigid: f64,
    #[serde(default)]
    minimized: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPair {
    a: String,
    b: String,
    rigid: f64,
    minimized: f64,
}

/// A design space together with the energy tables declared alongside it.
#[derive(Debug, Clone)]
pub struct DesignDefinition {
    pub space: DesignSpace,
    pub energies: TabulatedEnergies,
}

impl DesignDefinition {
    /// Loads a design from a TOML file.
    ///
    /// # Format
    ///
    /// ```toml
    /// name = "barnase-barstar"
    ///
    /// [energy]
    /// coupling = 0.5
    ///
    /// [[position]]
    /// name = "A27"
    /// strand = "protein"
    /// wild-type = "LYS"
    /// rc = [
    ///     { id = "LYS-0", res-type = "LYS", rigid = -1.2, minimized = -1.9 },
    ///     { id = "ARG-0", res-type = "ARG", rigid = -0.4, minimized = -1.1 },
    /// ]
    ///
    /// [[pair]]
    /// a = "A27/LYS-0"
    /// b = "B39/ASP-0"
    /// rigid = -0.8
    /// minimized = -1.5
    /// ```
    ///
    /// Pair terms not listed are zero. The complex contains every position in declaration
    /// order; the protein and ligand states contain the positions of their strand.
    ///
    /// # Errors
    ///
    /// Returns a [`DesignError`] if the file cannot be read or parsed, if the positions
    /// do not form a valid design space, or if any energy entry is inconsistent.
    pub fn from_path(path: &Path) -> Result<Self, DesignError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| DesignError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            DesignError::Toml { source, .. } => DesignError::Toml {
                path: path_str,
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DesignError> {
        let raw: RawDesign = toml::from_str(content).map_err(|e| DesignError::Toml {
            path: "<string>".to_string(),
            source: e,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawDesign) -> Result<Self, DesignError> {
        let coupling = raw.energy.coupling;
        if !(0.0..=1.0).contains(&coupling) {
            return Err(DesignError::InvalidCoupling(coupling));
        }
        let mut energies = TabulatedEnergies::new(coupling);

        let mut positions = Vec::with_capacity(raw.positions.len());
        for raw_position in raw.positions {
            let mut position =
                Position::new(&raw_position.name, raw_position.strand, raw_position.wild_type);
            for rc in raw_position.rcs {
                let bounds = EnergyBounds::new(rc.rigid, rc.minimized);
                validate_bounds(&format!("{}/{}", raw_position.name, rc.id), bounds)?;
                energies.set_single(&raw_position.name, &rc.id, bounds);
                position.push_rc(ResidueConf::new(rc.res_type, rc.id));
            }
            positions.push(position);
        }

        let space = DesignSpace::new(raw.name, positions)?;

        let mut seen = HashSet::new();
        for pair in raw.pairs {
            let (pos_a, rot_a) = resolve(&space, &pair.a)?;
            let (pos_b, rot_b) = resolve(&space, &pair.b)?;
            let entry = format!("pair {} : {}", pair.a, pair.b);
            if pos_a == pos_b {
                return Err(DesignError::InvalidEnergy {
                    entry,
                    reason: "both ends are on the same position".to_string(),
                });
            }
            let key = if pair.a <= pair.b {
                (pair.a.clone(), pair.b.clone())
            } else {
                (pair.b.clone(), pair.a.clone())
            };
            if !seen.insert(key) {
                return Err(DesignError::InvalidEnergy {
                    entry,
                    reason: "declared more than once".to_string(),
                });
            }
            let bounds = EnergyBounds::new(pair.rigid, pair.minimized);
            validate_bounds(&entry, bounds)?;
            energies.set_pair(pos_a, rot_a, pos_b, rot_b, bounds);
        }

        Ok(Self { space, energies })
    }
}

fn validate_bounds(entry: &str, bounds: EnergyBounds) -> Result<(), DesignError> {
    if !bounds.rigid.is_finite() || !bounds.minimized.is_finite() {
        return Err(DesignError::InvalidEnergy {
            entry: entry.to_string(),
            reason: "energies must be finite".to_string(),
        });
    }
    if bounds.minimized > bounds.rigid {
        return Err(DesignError::InvalidEnergy {
            entry: entry.to_string(),
            reason: format!(
                "minimized energy {} exceeds rigid energy {}",
                bounds.minimized, bounds.rigid
            ),
        });
    }
    Ok(())
}

fn resolve<'a>(space: &DesignSpace, reference: &'a str) -> Result<(&'a str, &'a str), DesignError> {
    let unknown = || DesignError::UnknownReference(reference.to_string());
    let (position, rotamer) = reference.split_once('/').ok_or_else(unknown)?;
    let complex = space.complex();
    let index = complex.find_position(position).ok_or_else(unknown)?;
    complex.position(index).find_rc(rotamer).ok_or_else(unknown)?;
    Ok((position, rotamer))
}
