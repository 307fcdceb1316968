use super::sequence::{PartialSequence, RcSet, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while assembling a conformation space.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("Duplicate position name '{0}'")]
    DuplicatePosition(String),
    #[error("Duplicate rotamer id '{rotamer}' at position '{position}'")]
    DuplicateRotamer { position: String, rotamer: String },
    #[error("Position '{0}' has no residue conformations")]
    EmptyPosition(String),
    #[error("Wild-type residue '{wild_type}' has no conformations at position '{position}'")]
    MissingWildType { position: String, wild_type: String },
    #[error("Design space has no {0} positions")]
    EmptyStrand(Strand),
}

/// The binding partner a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strand {
    Protein,
    Ligand,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Protein => write!(f, "protein"),
            Strand::Ligand => write!(f, "ligand"),
        }
    }
}

/// The three thermodynamic states whose partition functions make up a K* score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKind {
    Protein,
    Ligand,
    Complex,
}

impl StateKind {
    pub const ALL: [StateKind; 3] = [StateKind::Protein, StateKind::Ligand, StateKind::Complex];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Protein => "protein",
            StateKind::Ligand => "ligand",
            StateKind::Complex => "complex",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete side-chain conformation (residue type plus rotamer) at one position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResidueConf {
    pub res_type: String,
    pub rotamer: String,
}

impl ResidueConf {
    pub fn new(res_type: impl Into<String>, rotamer: impl Into<String>) -> Self {
        Self {
            res_type: res_type.into(),
            rotamer: rotamer.into(),
        }
    }
}

/// A mutable residue location and its allowed residue conformations.
///
/// RC order is significant: RC indices used throughout the engine are indices into
/// [`Position::rcs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    name: String,
    strand: Strand,
    wild_type: String,
    rcs: Vec<ResidueConf>,
    res_types: Vec<String>,
}

impl Position {
    pub fn new(name: impl Into<String>, strand: Strand, wild_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strand,
            wild_type: wild_type.into(),
            rcs: Vec::new(),
            res_types: Vec::new(),
        }
    }

    pub fn with_rc(mut self, rc: ResidueConf) -> Self {
        self.push_rc(rc);
        self
    }

    pub fn push_rc(&mut self, rc: ResidueConf) {
        if !self.res_types.contains(&rc.res_type) {
            self.res_types.push(rc.res_type.clone());
        }
        self.rcs.push(rc);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn wild_type(&self) -> &str {
        &self.wild_type
    }

    pub fn rcs(&self) -> &[ResidueConf] {
        &self.rcs
    }

    pub fn rc(&self, index: usize) -> &ResidueConf {
        &self.rcs[index]
    }

    pub fn num_rcs(&self) -> usize {
        self.rcs.len()
    }

    /// Residue types in the order they first appear among the RCs.
    pub fn res_types(&self) -> &[String] {
        &self.res_types
    }

    pub fn rcs_of_type<'a>(&'a self, res_type: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.rcs
            .iter()
            .enumerate()
            .filter(move |(_, rc)| rc.res_type == res_type)
            .map(|(index, _)| index)
    }

    pub fn find_rc(&self, rotamer: &str) -> Option<usize> {
        self.rcs.iter().position(|rc| rc.rotamer == rotamer)
    }

    fn validate(&self) -> Result<(), SpaceError> {
        if self.rcs.is_empty() {
            return Err(SpaceError::EmptyPosition(self.name.clone()));
        }
        let mut seen = HashSet::with_capacity(self.rcs.len());
        for rc in &self.rcs {
            if !seen.insert(rc.rotamer.as_str()) {
                return Err(SpaceError::DuplicateRotamer {
                    position: self.name.clone(),
                    rotamer: rc.rotamer.clone(),
                });
            }
        }
        if !self.res_types.contains(&self.wild_type) {
            return Err(SpaceError::MissingWildType {
                position: self.name.clone(),
                wild_type: self.wild_type.clone(),
            });
        }
        Ok(())
    }
}

/// An ordered set of positions with a stable identity used to key cached matrices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfSpace {
    id: String,
    positions: Vec<Position>,
}

impl ConfSpace {
    pub fn new(id: impl Into<String>, positions: Vec<Position>) -> Result<Self, SpaceError> {
        let mut names = HashSet::with_capacity(positions.len());
        for position in &positions {
            if !names.insert(position.name.as_str()) {
                return Err(SpaceError::DuplicatePosition(position.name.clone()));
            }
            position.validate()?;
        }
        Ok(Self {
            id: id.into(),
            positions,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, index: usize) -> &Position {
        &self.positions[index]
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn find_position(&self, name: &str) -> Option<usize> {
        self.positions.iter().position(|p| p.name == name)
    }

    /// Maps each of this space's positions to the same-named position of `other`.
    pub fn map_positions_to(&self, other: &ConfSpace) -> Vec<Option<usize>> {
        self.positions
            .iter()
            .map(|p| other.find_position(&p.name))
            .collect()
    }

    pub fn wild_type_sequence(&self) -> Sequence {
        Sequence::new(
            self.positions
                .iter()
                .map(|p| p.wild_type.clone())
                .collect(),
        )
    }

    /// Every RC at every position, regardless of residue type.
    pub fn all_rcs(&self) -> RcSet {
        RcSet::new(
            self.positions
                .iter()
                .map(|p| (0..p.num_rcs()).collect())
                .collect(),
        )
    }

    /// Total number of conformations over all sequences.
    pub fn num_conformations(&self) -> f64 {
        self.positions.iter().map(|p| p.num_rcs() as f64).product()
    }
}

/// The protein, ligand and complex conformation spaces of one design.
///
/// The complex holds every position in declaration order; the unbound states hold the
/// positions of their strand in the same relative order. All three share position names
/// and rotamer ids, so tabulated energies apply to each of them unchanged.
#[derive(Debug, Clone)]
pub struct DesignSpace {
    name: String,
    protein: Arc<ConfSpace>,
    ligand: Arc<ConfSpace>,
    complex: Arc<ConfSpace>,
    complex_to_protein: Vec<Option<usize>>,
    complex_to_ligand: Vec<Option<usize>>,
}

impl DesignSpace {
    pub fn new(name: impl Into<String>, positions: Vec<Position>) -> Result<Self, SpaceError> {
        let name = name.into();
        let (protein_positions, ligand_positions): (Vec<_>, Vec<_>) = positions
            .iter()
            .cloned()
            .partition(|p| p.strand == Strand::Protein);

        if protein_positions.is_empty() {
            return Err(SpaceError::EmptyStrand(Strand::Protein));
        }
        if ligand_positions.is_empty() {
            return Err(SpaceError::EmptyStrand(Strand::Ligand));
        }

        let complex = ConfSpace::new(format!("{name}.complex"), positions)?;
        let protein = ConfSpace::new(format!("{name}.protein"), protein_positions)?;
        let ligand = ConfSpace::new(format!("{name}.ligand"), ligand_positions)?;

        let complex_to_protein = complex.map_positions_to(&protein);
        let complex_to_ligand = complex.map_positions_to(&ligand);

        Ok(Self {
            name,
            protein: Arc::new(protein),
            ligand: Arc::new(ligand),
            complex: Arc::new(complex),
            complex_to_protein,
            complex_to_ligand,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self, kind: StateKind) -> &Arc<ConfSpace> {
        match kind {
            StateKind::Protein => &self.protein,
            StateKind::Ligand => &self.ligand,
            StateKind::Complex => &self.complex,
        }
    }

    pub fn protein(&self) -> &Arc<ConfSpace> {
        &self.protein
    }

    pub fn ligand(&self) -> &Arc<ConfSpace> {
        &self.ligand
    }

    pub fn complex(&self) -> &Arc<ConfSpace> {
        &self.complex
    }

    /// Projects a complex sequence onto the positions of `kind`.
    pub fn project(&self, sequence: &Sequence, kind: StateKind) -> Sequence {
        Sequence::new(self.project_values(sequence.res_types(), kind))
    }

    /// Projects a partial complex sequence onto the positions of `kind`.
    pub fn project_partial(&self, sequence: &PartialSequence, kind: StateKind) -> PartialSequence {
        PartialSequence::new(self.project_values(sequence.res_types(), kind))
    }

    fn project_values<T: Clone + Default>(&self, values: &[T], kind: StateKind) -> Vec<T> {
        let map = match kind {
            StateKind::Complex => return values.to_vec(),
            StateKind::Protein => &self.complex_to_protein,
            StateKind::Ligand => &self.complex_to_ligand,
        };
        let mut projected = vec![T::default(); self.state(kind).num_positions()];
        for (complex_pos, mapped) in map.iter().enumerate() {
            if let Some(pos) = mapped {
                projected[*pos] = values[complex_pos].clone();
            }
        }
        projected
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn position(name: &str, strand: Strand, rcs: &[(&str, &str)]) -> Position {
        let wild_type = rcs[0].0;
        rcs.iter().fold(Position::new(name, strand, wild_type), |p, (t, r)| {
            p.with_rc(ResidueConf::new(*t, *r))
        })
    }

    fn sample_design() -> DesignSpace {
        DesignSpace::new(
            "toy",
            vec![
                position("A1", Strand::Protein, &[("ALA", "ALA-0"), ("VAL", "VAL-0"), ("VAL", "VAL-1")]),
                position("B1", Strand::Ligand, &[("LEU", "LEU-0"), ("LEU", "LEU-1")]),
                position("A2", Strand::Protein, &[("SER", "SER-0"), ("THR", "THR-0")]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn position_tracks_res_types_in_first_seen_order() {
        let p = position("A1", Strand::Protein, &[("VAL", "v0"), ("ALA", "a0"), ("VAL", "v1")]);
        assert_eq!(p.res_types(), &["VAL".to_string(), "ALA".to_string()]);
        assert_eq!(p.rcs_of_type("VAL").collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(p.find_rc("a0"), Some(1));
        assert_eq!(p.find_rc("missing"), None);
    }

    #[test]
    fn conf_space_rejects_duplicate_position_names() {
        let result = ConfSpace::new(
            "dup",
            vec![
                position("A1", Strand::Protein, &[("ALA", "a")]),
                position("A1", Strand::Protein, &[("ALA", "a")]),
            ],
        );
        assert_eq!(result, Err(SpaceError::DuplicatePosition("A1".into())));
    }

    #[test]
    fn conf_space_rejects_duplicate_rotamer_ids() {
        let result = ConfSpace::new(
            "dup",
            vec![position("A1", Strand::Protein, &[("ALA", "x"), ("VAL", "x")])],
        );
        assert!(matches!(result, Err(SpaceError::DuplicateRotamer { .. })));
    }

    #[test]
    fn conf_space_rejects_missing_wild_type() {
        let p = Position::new("A1", Strand::Protein, "GLY").with_rc(ResidueConf::new("ALA", "a"));
        let result = ConfSpace::new("bad", vec![p]);
        assert!(matches!(result, Err(SpaceError::MissingWildType { .. })));
    }

    #[test]
    fn conf_space_rejects_empty_position() {
        let p = Position::new("A1", Strand::Protein, "GLY");
        assert_eq!(
            ConfSpace::new("bad", vec![p]),
            Err(SpaceError::EmptyPosition("A1".into()))
        );
    }

    #[test]
    fn empty_conf_space_has_one_conformation() {
        let space = ConfSpace::new("empty", Vec::new()).unwrap();
        assert_eq!(space.num_conformations(), 1.0);
        assert_eq!(space.num_positions(), 0);
    }

    #[test]
    fn design_space_splits_strands_in_declaration_order() {
        let design = sample_design();
        let protein: Vec<_> = design.protein().positions().iter().map(|p| p.name()).collect();
        let ligand: Vec<_> = design.ligand().positions().iter().map(|p| p.name()).collect();
        assert_eq!(protein, vec!["A1", "A2"]);
        assert_eq!(ligand, vec!["B1"]);
        assert_eq!(design.complex().num_positions(), 3);
        assert_eq!(design.complex().id(), "toy.complex");
        assert_eq!(design.state(StateKind::Ligand).id(), "toy.ligand");
    }

    #[test]
    fn design_space_requires_both_strands() {
        let result = DesignSpace::new("one", vec![position("A1", Strand::Protein, &[("ALA", "a")])]);
        assert!(matches!(result, Err(SpaceError::EmptyStrand(Strand::Ligand))));
    }

    #[test]
    fn partial_projection_keeps_open_positions_open() {
        let design = sample_design();
        let partial = PartialSequence::open(3).assign(0, "VAL");
        assert_eq!(design.project_partial(&partial, StateKind::Protein).to_string(), "VAL *");
        assert_eq!(design.project_partial(&partial, StateKind::Ligand).to_string(), "*");
        assert_eq!(design.project_partial(&partial, StateKind::Complex), partial);
    }

    #[test]
    fn project_maps_complex_sequence_to_unbound_states() {
        let design = sample_design();
        let sequence: Sequence = "VAL LEU THR".parse().unwrap();
        assert_eq!(
            design.project(&sequence, StateKind::Protein),
            "VAL THR".parse().unwrap()
        );
        assert_eq!(
            design.project(&sequence, StateKind::Ligand),
            "LEU".parse().unwrap()
        );
        assert_eq!(design.project(&sequence, StateKind::Complex), sequence);
    }

    #[test]
    fn wild_type_sequence_uses_declared_wild_types() {
        let design = sample_design();
        assert_eq!(
            design.complex().wild_type_sequence().to_string(),
            "ALA LEU SER"
        );
    }
}
