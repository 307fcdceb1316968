use super::{ConfEnergyCalculator, EnergyEvaluation, EnergyModel, MinimizationFailure};
use crate::core::space::ConfSpace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Rigid and minimized values of one energy term.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyBounds {
    pub rigid: f64,
    pub minimized: f64,
}

impl EnergyBounds {
    pub fn new(rigid: f64, minimized: f64) -> Self {
        Self { rigid, minimized }
    }

    pub fn select(&self, model: EnergyModel) -> f64 {
        match model {
            EnergyModel::Rigid => self.rigid,
            EnergyModel::Minimized => self.minimized,
        }
    }

    fn accumulate(&mut self, other: EnergyBounds) {
        self.rigid += other.rigid;
        self.minimized += other.minimized;
    }

    fn hash_bits<H: Hasher>(&self, state: &mut H) {
        self.rigid.to_bits().hash(state);
        self.minimized.to_bits().hash(state);
    }
}

/// A reference energy backend backed by tables of single and pair terms.
///
/// Terms are keyed by position name and rotamer id, so the same table serves the
/// protein, ligand and complex spaces of a design. Missing terms are zero.
///
/// A full minimization is modelled as relaxing part of the way from the rigid energy to
/// the sum of minimized terms: `E = min_sum + coupling * (rigid_sum - min_sum)`. With
/// `coupling` in `[0, 1]` and every minimized term at or below its rigid term, `E` lies
/// between the two matrix bounds of the conformation.
#[derive(Debug, Clone)]
pub struct TabulatedEnergies {
    singles: HashMap<RcKey, EnergyBounds>,
    pairs: HashMap<(RcKey, RcKey), EnergyBounds>,
    coupling: f64,
}

type RcKey = (String, String);

fn rc_key(position: &str, rotamer: &str) -> RcKey {
    (position.to_string(), rotamer.to_string())
}

fn pair_key(a: RcKey, b: RcKey) -> (RcKey, RcKey) {
    if a <= b { (a, b) } else { (b, a) }
}

impl TabulatedEnergies {
    pub const DEFAULT_COUPLING: f64 = 0.5;

    pub fn new(coupling: f64) -> Self {
        Self {
            singles: HashMap::new(),
            pairs: HashMap::new(),
            coupling,
        }
    }

    pub fn coupling(&self) -> f64 {
        self.coupling
    }

    pub fn num_terms(&self) -> usize {
        self.singles.len() + self.pairs.len()
    }

    pub fn set_single(&mut self, position: &str, rotamer: &str, bounds: EnergyBounds) {
        self.singles.insert(rc_key(position, rotamer), bounds);
    }

    pub fn set_pair(
        &mut self,
        position_a: &str,
        rotamer_a: &str,
        position_b: &str,
        rotamer_b: &str,
        bounds: EnergyBounds,
    ) {
        let key = pair_key(rc_key(position_a, rotamer_a), rc_key(position_b, rotamer_b));
        self.pairs.insert(key, bounds);
    }

    fn single_bounds(&self, space: &ConfSpace, pos: usize, rc: usize) -> EnergyBounds {
        let position = space.position(pos);
        self.singles
            .get(&rc_key(position.name(), &position.rc(rc).rotamer))
            .copied()
            .unwrap_or_default()
    }

    fn pair_bounds(
        &self,
        space: &ConfSpace,
        pos1: usize,
        rc1: usize,
        pos2: usize,
        rc2: usize,
    ) -> EnergyBounds {
        let (p1, p2) = (space.position(pos1), space.position(pos2));
        let key = pair_key(
            rc_key(p1.name(), &p1.rc(rc1).rotamer),
            rc_key(p2.name(), &p2.rc(rc2).rotamer),
        );
        self.pairs.get(&key).copied().unwrap_or_default()
    }

    /// Summed single and pair terms of a full conformation.
    pub fn conformation_bounds(&self, space: &ConfSpace, conformation: &[usize]) -> EnergyBounds {
        let mut total = EnergyBounds::default();
        for (pos1, &rc1) in conformation.iter().enumerate() {
            total.accumulate(self.single_bounds(space, pos1, rc1));
            for (pos2, &rc2) in conformation.iter().enumerate().take(pos1) {
                total.accumulate(self.pair_bounds(space, pos1, rc1, pos2, rc2));
            }
        }
        total
    }

    fn check_range(
        space: &ConfSpace,
        conformation: &[usize],
    ) -> Result<(), MinimizationFailure> {
        if conformation.len() != space.num_positions() {
            return Err(MinimizationFailure::new(
                space.id(),
                conformation,
                format!(
                    "expected {} assigned positions, got {}",
                    space.num_positions(),
                    conformation.len()
                ),
            ));
        }
        for (pos, &rc) in conformation.iter().enumerate() {
            if rc >= space.position(pos).num_rcs() {
                return Err(MinimizationFailure::new(
                    space.id(),
                    conformation,
                    format!("RC index {rc} out of range at position {pos}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for TabulatedEnergies {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COUPLING)
    }
}

impl ConfEnergyCalculator for TabulatedEnergies {
    fn single_energy(
        &self,
        space: &ConfSpace,
        pos: usize,
        rc: usize,
        model: EnergyModel,
    ) -> Result<f64, MinimizationFailure> {
        Ok(self.single_bounds(space, pos, rc).select(model))
    }

    fn pair_energy(
        &self,
        space: &ConfSpace,
        pos1: usize,
        rc1: usize,
        pos2: usize,
        rc2: usize,
        model: EnergyModel,
    ) -> Result<f64, MinimizationFailure> {
        Ok(self.pair_bounds(space, pos1, rc1, pos2, rc2).select(model))
    }

    /// Hash of every tabulated term in key order. The coupling only affects full
    /// evaluations, never matrix entries, so it is left out.
    fn fingerprint(&self) -> Option<u64> {
        let mut singles: Vec<_> = self.singles.iter().collect();
        singles.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let mut pairs: Vec<_> = self.pairs.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut hasher = DefaultHasher::new();
        singles.len().hash(&mut hasher);
        for (key, bounds) in singles {
            key.hash(&mut hasher);
            bounds.hash_bits(&mut hasher);
        }
        pairs.len().hash(&mut hasher);
        for (key, bounds) in pairs {
            key.hash(&mut hasher);
            bounds.hash_bits(&mut hasher);
        }
        Some(hasher.finish())
    }

    fn evaluate(
        &self,
        space: &ConfSpace,
        conformation: &[usize],
        model: EnergyModel,
    ) -> Result<EnergyEvaluation, MinimizationFailure> {
        Self::check_range(space, conformation)?;
        let bounds = self.conformation_bounds(space, conformation);
        let energy = match model {
            EnergyModel::Rigid => bounds.rigid,
            EnergyModel::Minimized => {
                bounds.minimized + self.coupling * (bounds.rigid - bounds.minimized)
            }
        };
        let n = conformation.len();
        Ok(EnergyEvaluation {
            energy,
            cost: (n + n * n.saturating_sub(1) / 2) as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::Strand;
    use crate::core::space::tests::position;

    fn space() -> ConfSpace {
        ConfSpace::new(
            "table",
            vec![
                position("A1", Strand::Protein, &[("ALA", "a0"), ("ALA", "a1")]),
                position("B1", Strand::Ligand, &[("LEU", "l0")]),
            ],
        )
        .unwrap()
    }

    fn table() -> TabulatedEnergies {
        let mut t = TabulatedEnergies::new(0.25);
        t.set_single("A1", "a0", EnergyBounds::new(-1.0, -2.0));
        t.set_single("B1", "l0", EnergyBounds::new(0.5, 0.0));
        t.set_pair("B1", "l0", "A1", "a0", EnergyBounds::new(1.0, -1.0));
        t
    }

    #[test]
    fn fingerprint_tracks_term_values_not_insertion_order() {
        let t = table();
        let mut reordered = TabulatedEnergies::new(0.9);
        reordered.set_pair("A1", "a0", "B1", "l0", EnergyBounds::new(1.0, -1.0));
        reordered.set_single("B1", "l0", EnergyBounds::new(0.5, 0.0));
        reordered.set_single("A1", "a0", EnergyBounds::new(-1.0, -2.0));
        assert_eq!(t.fingerprint(), reordered.fingerprint());

        let mut changed = table();
        changed.set_pair("B1", "l0", "A1", "a0", EnergyBounds::new(1.0, -1.5));
        assert_ne!(t.fingerprint(), changed.fingerprint());
        assert!(t.fingerprint().is_some());
    }

    #[test]
    fn pair_lookup_ignores_argument_order() {
        let space = space();
        let t = table();
        let forward = t.pair_energy(&space, 0, 0, 1, 0, EnergyModel::Rigid).unwrap();
        let reverse = t.pair_energy(&space, 1, 0, 0, 0, EnergyModel::Rigid).unwrap();
        assert_eq!(forward, 1.0);
        assert_eq!(reverse, 1.0);
    }

    #[test]
    fn missing_terms_are_zero() {
        let space = space();
        let t = table();
        assert_eq!(t.single_energy(&space, 0, 1, EnergyModel::Minimized).unwrap(), 0.0);
        assert_eq!(t.pair_energy(&space, 0, 1, 1, 0, EnergyModel::Minimized).unwrap(), 0.0);
    }

    #[test]
    fn evaluate_interpolates_between_bounds() {
        let space = space();
        let t = table();
        let rigid = t.evaluate(&space, &[0, 0], EnergyModel::Rigid).unwrap();
        let minimized = t.evaluate(&space, &[0, 0], EnergyModel::Minimized).unwrap();
        assert_eq!(rigid.energy, 0.5);
        // min_sum = -3.0, rigid_sum = 0.5
        assert!((minimized.energy - (-3.0 + 0.25 * 3.5)).abs() < 1e-12);
        assert_eq!(minimized.cost, 3.0);
    }

    #[test]
    fn evaluate_rejects_malformed_conformations() {
        let space = space();
        let t = table();
        assert!(t.evaluate(&space, &[0], EnergyModel::Rigid).is_err());
        let err = t.evaluate(&space, &[2, 0], EnergyModel::Rigid).unwrap_err();
        assert!(err.reason.contains("out of range"));
    }
}
