//! Partition function bounds shared by every sequence below a node of the sequence tree.
//!
//! A partial sequence stands for all full sequences that agree with it on its assigned
//! positions. Its RC set is the union of theirs, so a bound over that union covers each
//! of them without starting an estimator.

use super::context::StateContext;
use super::scoring::{BoundSide, NodeScorer};
use super::search::ConfAStar;
use crate::core::boltzmann::{LogSum, ln_weight};
use crate::core::sequence::PartialSequence;
use crate::core::space::StateKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Conformations enumerated one by one before the rest are bounded in bulk.
pub(crate) const BOUND_CONFS: usize = 1000;

/// Upper bound on `ln Z` of every sequence matching `sequence`.
///
/// Sums the lower-bound weights of the first `max_confs` conformations A* returns over
/// the union of matching RCs, then adds the remaining count times the weight of the
/// frontier's lowest bound.
pub(crate) fn ln_z_upper(context: &StateContext, sequence: &PartialSequence, max_confs: usize) -> f64 {
    let rcs = sequence.make_rcs(context.space());
    let mut search = ConfAStar::new(Arc::clone(context.minimized_matrix()), rcs);
    let total = search.num_conformations();
    let mut sum = LogSum::new();
    let mut taken = 0usize;
    while taken < max_confs {
        let Some(conf) = search.next() else { break };
        sum.add_ln(ln_weight(conf.score));
        taken += 1;
    }
    let remaining = total - taken as f64;
    if let Some(bound) = search.peek_lower_bound() {
        if remaining > 0.0 {
            sum.add_ln(remaining.ln() + ln_weight(bound));
        }
    }
    sum.ln_value()
}

/// Lower bound on `ln Z` of every sequence matching `sequence`.
///
/// Minimized energies never exceed rigid energies, and the rigid-matrix upper bound over
/// the union caps every rigid energy. Each matching sequence has at least
/// [`PartialSequence::min_conformations`] conformations at or below that cap.
pub(crate) fn ln_z_lower(context: &StateContext, sequence: &PartialSequence) -> f64 {
    let min_confs = sequence.min_conformations(context.space());
    if min_confs <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let rcs = sequence.make_rcs(context.space());
    let root = vec![None; rcs.num_positions()];
    let cap = NodeScorer::new(context.rigid_matrix(), &rcs).score(&root, BoundSide::Upper);
    min_confs.ln() + ln_weight(cap)
}

/// Memoized tree bounds, keyed by state and projected partial sequence.
#[derive(Debug, Default)]
pub(crate) struct SequenceBounds {
    lower: HashMap<(StateKind, PartialSequence), f64>,
    upper: HashMap<(StateKind, PartialSequence), f64>,
}

impl SequenceBounds {
    pub fn ln_lower(&mut self, context: &StateContext, sequence: &PartialSequence) -> f64 {
        *self
            .lower
            .entry((context.kind(), sequence.clone()))
            .or_insert_with(|| ln_z_lower(context, sequence))
    }

    pub fn ln_upper(&mut self, context: &StateContext, sequence: &PartialSequence) -> f64 {
        *self
            .upper
            .entry((context.kind(), sequence.clone()))
            .or_insert_with(|| ln_z_upper(context, sequence, BOUND_CONFS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boltzmann::RT;
    use crate::core::energy::{ConfEnergyCalculator, EnergyBounds, EnergyModel, TabulatedEnergies};
    use crate::core::sequence::{Sequence, enumerate_sequences};
    use crate::core::space::tests::position;
    use crate::core::space::{ConfSpace, Strand};
    use crate::engine::context::tests::context_for;
    use crate::engine::pfunc::tests::exact_ln_z;
    use crate::engine::scoring::tests::all_conformations;

    fn space() -> ConfSpace {
        ConfSpace::new(
            "tree",
            vec![
                position("A", Strand::Protein, &[("ALA", "a0"), ("VAL", "v0"), ("VAL", "v1")]),
                position("B", Strand::Protein, &[("SER", "s0"), ("THR", "t0"), ("THR", "t1")]),
            ],
        )
        .unwrap()
    }

    fn energies() -> TabulatedEnergies {
        let mut e = TabulatedEnergies::new(0.4);
        e.set_single("A", "v0", EnergyBounds::new(-1.0, -3.0));
        e.set_single("A", "v1", EnergyBounds::new(2.0, 0.5));
        e.set_single("B", "t1", EnergyBounds::new(0.5, -0.5));
        e.set_pair("A", "v0", "B", "t0", EnergyBounds::new(-2.0, -4.0));
        e.set_pair("A", "a0", "B", "s0", EnergyBounds::new(1.0, 0.0));
        e
    }

    /// `ln Z` of one full sequence by brute force.
    fn exact_for(space: &ConfSpace, energies: &TabulatedEnergies, sequence: &Sequence) -> f64 {
        let energies: Vec<f64> = all_conformations(&sequence.make_rcs(space))
            .iter()
            .map(|c| energies.evaluate(space, c, EnergyModel::Minimized).unwrap().energy)
            .collect();
        let min = energies.iter().copied().fold(f64::INFINITY, f64::min);
        let scaled: f64 = energies.iter().map(|e| (-(e - min) / RT).exp()).sum();
        scaled.ln() - min / RT
    }

    #[test]
    fn bounds_cover_every_matching_sequence() {
        let space = space();
        let energies = energies();
        let sequences = enumerate_sequences(&space, None);
        let context = context_for(space.clone(), Arc::new(energies.clone()));

        let partials = [
            PartialSequence::open(2),
            PartialSequence::open(2).assign(0, "VAL"),
            PartialSequence::open(2).assign(0, "ALA"),
            PartialSequence::open(2).assign(0, "VAL").assign(1, "THR"),
        ];
        for partial in &partials {
            let upper = ln_z_upper(&context, partial, 2);
            let lower = ln_z_lower(&context, partial);
            for sequence in &sequences {
                let matches = partial
                    .res_types()
                    .iter()
                    .zip(sequence.res_types())
                    .all(|(p, s)| p.as_ref().is_none_or(|p| p == s));
                if !matches {
                    continue;
                }
                let exact = exact_for(&space, &energies, sequence);
                assert!(lower <= exact + 1e-9, "{partial}: lower {lower} > {exact} for {sequence}");
                assert!(exact <= upper + 1e-9, "{partial}: upper {upper} < {exact} for {sequence}");
            }
        }
    }

    #[test]
    fn full_enumeration_makes_the_upper_bound_exact_without_coupling() {
        let space = space();
        // With no coupling every minimized energy equals its matrix sum.
        let mut energies = TabulatedEnergies::new(0.0);
        energies.set_single("A", "v0", EnergyBounds::new(-1.0, -3.0));
        energies.set_pair("A", "v0", "B", "t0", EnergyBounds::new(-2.0, -4.0));
        let exact = exact_ln_z(&space, &energies);
        let context = context_for(space, Arc::new(energies));
        let upper = ln_z_upper(&context, &PartialSequence::open(2), usize::MAX);
        assert!((upper - exact).abs() < 1e-9);
    }

    #[test]
    fn zero_position_space_has_unit_bounds() {
        let context = context_for(
            ConfSpace::new("none", Vec::new()).unwrap(),
            Arc::new(TabulatedEnergies::default()),
        );
        let root = PartialSequence::open(0);
        assert_eq!(ln_z_upper(&context, &root, BOUND_CONFS), 0.0);
        assert_eq!(ln_z_lower(&context, &root), 0.0);
    }

    #[test]
    fn bounds_are_memoized_per_state_and_sequence() {
        let context = context_for(space(), Arc::new(energies()));
        let mut bounds = SequenceBounds::default();
        let partial = PartialSequence::open(2).assign(0, "VAL");
        let first = bounds.ln_upper(&context, &partial);
        assert_eq!(bounds.ln_upper(&context, &partial), first);
        bounds.ln_lower(&context, &partial);
        assert_eq!(bounds.upper.len(), 1);
        assert_eq!(bounds.lower.len(), 1);
    }
}
