use super::space::ConfSpace;
use itertools::Itertools;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// One residue type per position of a conformation space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sequence {
    res_types: Vec<String>,
}

impl Sequence {
    pub fn new(res_types: Vec<String>) -> Self {
        Self { res_types }
    }

    pub fn len(&self) -> usize {
        self.res_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.res_types.is_empty()
    }

    pub fn res_type(&self, pos: usize) -> &str {
        &self.res_types[pos]
    }

    pub fn res_types(&self) -> &[String] {
        &self.res_types
    }

    /// The RCs of `space` compatible with this sequence.
    pub fn make_rcs(&self, space: &ConfSpace) -> RcSet {
        debug_assert_eq!(self.len(), space.num_positions());
        RcSet::new(
            space
                .positions()
                .iter()
                .zip(&self.res_types)
                .map(|(position, res_type)| position.rcs_of_type(res_type).collect())
                .collect(),
        )
    }

    pub fn count_mutations(&self, space: &ConfSpace) -> usize {
        space
            .positions()
            .iter()
            .zip(&self.res_types)
            .filter(|(position, res_type)| position.wild_type() != res_type.as_str())
            .count()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.res_types.join(" "))
    }
}

impl FromStr for Sequence {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.split_whitespace().map(str::to_string).collect()))
    }
}

/// A sequence whose open positions (`None`) may still take any residue type.
///
/// Partial sequences label the inner nodes of the sequence tree. Positions are fixed
/// left to right, so every open position comes after every assigned one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialSequence {
    res_types: Vec<Option<String>>,
}

impl PartialSequence {
    pub fn new(res_types: Vec<Option<String>>) -> Self {
        Self { res_types }
    }

    /// The root of the tree: every position open.
    pub fn open(num_positions: usize) -> Self {
        Self::new(vec![None; num_positions])
    }

    pub fn len(&self) -> usize {
        self.res_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.res_types.is_empty()
    }

    pub fn res_type(&self, pos: usize) -> Option<&str> {
        self.res_types[pos].as_deref()
    }

    pub fn res_types(&self) -> &[Option<String>] {
        &self.res_types
    }

    pub fn next_open(&self) -> Option<usize> {
        self.res_types.iter().position(Option::is_none)
    }

    pub fn is_complete(&self) -> bool {
        self.next_open().is_none()
    }

    /// A copy with `pos` fixed to `res_type`.
    pub fn assign(&self, pos: usize, res_type: &str) -> Self {
        let mut res_types = self.res_types.clone();
        res_types[pos] = Some(res_type.to_string());
        Self::new(res_types)
    }

    /// Mutations among the assigned positions.
    pub fn count_mutations(&self, space: &ConfSpace) -> usize {
        space
            .positions()
            .iter()
            .zip(&self.res_types)
            .filter(|(position, res_type)| {
                res_type.as_deref().is_some_and(|t| t != position.wild_type())
            })
            .count()
    }

    /// The full sequence with every open position set to its wild type.
    pub fn fill_wild_type(&self, space: &ConfSpace) -> Sequence {
        Sequence::new(
            space
                .positions()
                .iter()
                .zip(&self.res_types)
                .map(|(position, res_type)| {
                    res_type
                        .clone()
                        .unwrap_or_else(|| position.wild_type().to_string())
                })
                .collect(),
        )
    }

    /// The RCs of every sequence matching this one: all RCs at open positions.
    pub fn make_rcs(&self, space: &ConfSpace) -> RcSet {
        debug_assert_eq!(self.len(), space.num_positions());
        RcSet::new(
            space
                .positions()
                .iter()
                .zip(&self.res_types)
                .map(|(position, res_type)| match res_type {
                    Some(res_type) => position.rcs_of_type(res_type).collect(),
                    None => (0..position.num_rcs()).collect(),
                })
                .collect(),
        )
    }

    /// The fewest conformations any matching full sequence can have.
    pub fn min_conformations(&self, space: &ConfSpace) -> f64 {
        space
            .positions()
            .iter()
            .zip(&self.res_types)
            .map(|(position, res_type)| {
                let count = match res_type {
                    Some(res_type) => position.rcs_of_type(res_type).count(),
                    None => position
                        .res_types()
                        .iter()
                        .map(|t| position.rcs_of_type(t).count())
                        .min()
                        .unwrap_or(0),
                };
                count as f64
            })
            .product()
    }
}

impl From<&Sequence> for PartialSequence {
    fn from(sequence: &Sequence) -> Self {
        Self::new(sequence.res_types().iter().cloned().map(Some).collect())
    }
}

impl fmt::Display for PartialSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self
            .res_types
            .iter()
            .map(|t| t.as_deref().unwrap_or("*"))
            .collect();
        write!(f, "{}", labels.join(" "))
    }
}

/// The RC indices eligible at each position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RcSet {
    rcs: Vec<Vec<usize>>,
}

impl RcSet {
    pub fn new(rcs: Vec<Vec<usize>>) -> Self {
        Self { rcs }
    }

    pub fn num_positions(&self) -> usize {
        self.rcs.len()
    }

    pub fn get(&self, pos: usize) -> &[usize] {
        &self.rcs[pos]
    }

    /// Number of full conformations; one for a space with no positions.
    pub fn num_conformations(&self) -> f64 {
        self.rcs.iter().map(|r| r.len() as f64).product()
    }

    pub fn has_empty_position(&self) -> bool {
        self.rcs.iter().any(Vec::is_empty)
    }

    pub fn contains(&self, conformation: &[usize]) -> bool {
        conformation.len() == self.rcs.len()
            && conformation
                .iter()
                .zip(&self.rcs)
                .all(|(rc, allowed)| allowed.contains(rc))
    }

    /// `suffix[d]` is the number of completions of a node that assigns positions `0..d`.
    pub fn suffix_counts(&self) -> Vec<f64> {
        let mut suffix = vec![1.0; self.rcs.len() + 1];
        for d in (0..self.rcs.len()).rev() {
            suffix[d] = suffix[d + 1] * self.rcs[d].len() as f64;
        }
        suffix
    }
}

/// Enumerates every sequence of `space` in creation order: the Cartesian product of each
/// position's residue types, leftmost position varying slowest.
///
/// With `max_mutations` set, sequences with more positions differing from wild type are
/// skipped.
pub fn enumerate_sequences(space: &ConfSpace, max_mutations: Option<usize>) -> Vec<Sequence> {
    if space.num_positions() == 0 {
        return vec![Sequence::new(Vec::new())];
    }
    space
        .positions()
        .iter()
        .map(|p| p.res_types().iter().cloned())
        .multi_cartesian_product()
        .map(Sequence::new)
        .filter(|s| max_mutations.is_none_or(|max| s.count_mutations(space) <= max))
        .collect()
}

/// Number of sequences [`enumerate_sequences`] would produce, counted per mutation level
/// instead of enumerated. Saturates at `u128::MAX`.
pub fn count_sequences(space: &ConfSpace, max_mutations: Option<usize>) -> u128 {
    let limit = max_mutations
        .unwrap_or(space.num_positions())
        .min(space.num_positions());
    // ways[m]: choices for the positions seen so far with exactly m mutations
    let mut ways = vec![0u128; limit + 1];
    ways[0] = 1;
    for position in space.positions() {
        let mutants = position.res_types().len().saturating_sub(1) as u128;
        for m in (1..=limit).rev() {
            ways[m] = ways[m].saturating_add(ways[m - 1].saturating_mul(mutants));
        }
    }
    ways.into_iter().fold(0, u128::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::Strand;
    use crate::core::space::tests::position;

    fn space() -> ConfSpace {
        ConfSpace::new(
            "seq",
            vec![
                position("A1", Strand::Protein, &[("ALA", "a0"), ("VAL", "v0"), ("VAL", "v1")]),
                position("A2", Strand::Protein, &[("SER", "s0"), ("THR", "t0"), ("GLY", "g0")]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn display_and_parse_are_space_separated() {
        let s: Sequence = "ALA  VAL".parse().unwrap();
        assert_eq!(s.res_types(), &["ALA".to_string(), "VAL".to_string()]);
        assert_eq!(s.to_string(), "ALA VAL");
    }

    #[test]
    fn make_rcs_restricts_to_sequence_res_types() {
        let space = space();
        let rcs = "VAL THR".parse::<Sequence>().unwrap().make_rcs(&space);
        assert_eq!(rcs.get(0), &[1, 2]);
        assert_eq!(rcs.get(1), &[1]);
        assert_eq!(rcs.num_conformations(), 2.0);
        assert!(rcs.contains(&[2, 1]));
        assert!(!rcs.contains(&[0, 1]));
    }

    #[test]
    fn suffix_counts_multiply_from_the_right() {
        let rcs = RcSet::new(vec![vec![0, 1, 2], vec![0, 1]]);
        assert_eq!(rcs.suffix_counts(), vec![6.0, 2.0, 1.0]);
        assert_eq!(RcSet::new(Vec::new()).suffix_counts(), vec![1.0]);
    }

    #[test]
    fn enumeration_is_in_creation_order() {
        let sequences: Vec<String> = enumerate_sequences(&space(), None)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            sequences,
            vec![
                "ALA SER", "ALA THR", "ALA GLY", "VAL SER", "VAL THR", "VAL GLY"
            ]
        );
    }

    #[test]
    fn enumeration_honors_mutation_limit() {
        let space = space();
        let sequences = enumerate_sequences(&space, Some(1));
        assert_eq!(sequences.len(), 4);
        assert!(sequences.iter().all(|s| s.count_mutations(&space) <= 1));
        assert_eq!(enumerate_sequences(&space, Some(0)), vec![space.wild_type_sequence()]);
    }

    #[test]
    fn counting_matches_enumeration() {
        let space = space();
        for limit in [None, Some(0), Some(1), Some(2), Some(5)] {
            assert_eq!(
                count_sequences(&space, limit),
                enumerate_sequences(&space, limit).len() as u128,
                "limit {limit:?}"
            );
        }
        let empty = ConfSpace::new("empty", Vec::new()).unwrap();
        assert_eq!(count_sequences(&empty, None), 1);
    }

    #[test]
    fn counting_does_not_overflow_on_huge_spaces() {
        let residues: Vec<(String, String)> = (0..20).map(|i| (format!("R{i:02}"), format!("r{i}"))).collect();
        let refs: Vec<(&str, &str)> = residues.iter().map(|(t, r)| (t.as_str(), r.as_str())).collect();
        let positions = (0..40)
            .map(|i| position(&format!("P{i}"), Strand::Protein, &refs))
            .collect();
        let space = ConfSpace::new("huge", positions).unwrap();
        // 20^40 overflows u128.
        assert_eq!(count_sequences(&space, None), u128::MAX);
        assert_eq!(count_sequences(&space, Some(1)), 1 + 40 * 19);
    }

    #[test]
    fn partial_sequences_open_every_residue_type() {
        let space = space();
        let root = PartialSequence::open(2);
        assert_eq!(root.next_open(), Some(0));
        assert_eq!(root.to_string(), "* *");
        assert_eq!(root.make_rcs(&space).num_conformations(), 9.0);
        // ALA has one RC at A1, and SER, THR and GLY one each at A2.
        assert_eq!(root.min_conformations(&space), 1.0);

        let val = root.assign(0, "VAL");
        assert_eq!(val.next_open(), Some(1));
        assert_eq!(val.count_mutations(&space), 1);
        assert_eq!(val.make_rcs(&space).get(0), &[1, 2]);
        assert_eq!(val.min_conformations(&space), 2.0);
        assert_eq!(val.fill_wild_type(&space).to_string(), "VAL SER");
        assert!(!val.is_complete());

        let full = val.assign(1, "GLY");
        assert!(full.is_complete());
        assert_eq!(full, PartialSequence::from(&"VAL GLY".parse::<Sequence>().unwrap()));
    }

    #[test]
    fn empty_space_has_one_empty_sequence() {
        let space = ConfSpace::new("empty", Vec::new()).unwrap();
        let sequences = enumerate_sequences(&space, None);
        assert_eq!(sequences.len(), 1);
        assert!(sequences[0].is_empty());
    }
}
