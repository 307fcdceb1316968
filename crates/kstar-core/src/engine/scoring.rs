use crate::core::matrix::EnergyMatrix;
use crate::core::sequence::RcSet;

/// Which side of the energy range a heuristic bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundSide {
    /// Admissible lower bound on every completion.
    Lower,
    /// Upper bound on every completion.
    Upper,
}

impl BoundSide {
    #[inline]
    fn pick(self, a: f64, b: f64) -> f64 {
        match self {
            BoundSide::Lower => a.min(b),
            BoundSide::Upper => a.max(b),
        }
    }

    #[inline]
    fn identity(self) -> f64 {
        match self {
            BoundSide::Lower => f64::INFINITY,
            BoundSide::Upper => f64::NEG_INFINITY,
        }
    }
}

/// Scores partial assignments against one energy matrix.
///
/// Assignments are filled in position order, so every unassigned position has a higher
/// index than every assigned one.
pub(crate) struct NodeScorer<'a> {
    matrix: &'a EnergyMatrix,
    rcs: &'a RcSet,
}

impl<'a> NodeScorer<'a> {
    pub fn new(matrix: &'a EnergyMatrix, rcs: &'a RcSet) -> Self {
        debug_assert_eq!(matrix.num_positions(), rcs.num_positions());
        Self { matrix, rcs }
    }

    /// Energy of the assigned positions: their singles and the pairs among them.
    pub fn g(&self, assignment: &[Option<usize>]) -> f64 {
        let mut energy = 0.0;
        for (i, ri) in assignment.iter().enumerate() {
            let Some(ri) = *ri else { continue };
            energy += self.matrix.single(i, ri);
            for (j, rj) in assignment.iter().enumerate().take(i) {
                if let Some(rj) = *rj {
                    energy += self.matrix.pair(i, ri, j, rj);
                }
            }
        }
        energy
    }

    /// Bound on the energy the unassigned positions can still contribute.
    ///
    /// For each unassigned position `i` this takes the extreme, over its RCs `r`, of
    /// `E(i,r) + sum_assigned E(i,r,j,rj) + sum_{k>i unassigned} extreme_s E(i,r,k,s)`.
    pub fn h(&self, assignment: &[Option<usize>], side: BoundSide) -> f64 {
        let unassigned: Vec<usize> = assignment
            .iter()
            .enumerate()
            .filter(|(_, rc)| rc.is_none())
            .map(|(pos, _)| pos)
            .collect();

        let mut total = 0.0;
        for (n, &i) in unassigned.iter().enumerate() {
            let mut best = side.identity();
            for &r in self.rcs.get(i) {
                let mut energy = self.matrix.single(i, r);
                for (j, rj) in assignment.iter().enumerate() {
                    if let Some(rj) = *rj {
                        energy += self.matrix.pair(i, r, j, rj);
                    }
                }
                for &k in &unassigned[n + 1..] {
                    let extreme = self
                        .rcs
                        .get(k)
                        .iter()
                        .fold(side.identity(), |acc, &s| side.pick(acc, self.matrix.pair(i, r, k, s)));
                    energy += extreme;
                }
                best = side.pick(best, energy);
            }
            total += best;
        }
        total
    }

    pub fn score(&self, assignment: &[Option<usize>], side: BoundSide) -> f64 {
        self.g(assignment) + self.h(assignment, side)
    }
}
