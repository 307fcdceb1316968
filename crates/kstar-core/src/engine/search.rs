use super::scoring::{BoundSide, NodeScorer};
use crate::core::energy::EnergyModel;
use crate::core::matrix::EnergyMatrix;
use crate::core::sequence::RcSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Which energy matrix drives a conformation search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoringStrategy {
    /// Lower bounds from the minimized matrix.
    TraditionalBound,
    /// Scores from the rigid matrix.
    RigidBound,
}

impl ScoringStrategy {
    pub fn energy_model(&self) -> EnergyModel {
        match self {
            ScoringStrategy::TraditionalBound => EnergyModel::Minimized,
            ScoringStrategy::RigidBound => EnergyModel::Rigid,
        }
    }
}

/// A fully assigned conformation and its bound energy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredConf {
    pub assignment: Vec<usize>,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct SearchNode {
    assignment: Vec<Option<usize>>,
    depth: usize,
    score: f64,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    // The heap pops the greatest node: lowest score, then deepest, then the
    // lexicographically smallest assignment.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.depth.cmp(&other.depth))
            .then_with(|| other.assignment.cmp(&self.assignment))
    }
}

/// One unit of search work, exposed for inspecting the expansion order.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStep {
    Expanded { depth: usize, score: f64 },
    Leaf(ScoredConf),
}

/// Best-first enumeration of the conformations of one sequence.
///
/// Conformations come out in non-decreasing order of their lower-bound energy. The
/// search is lazy and can be resumed at any point.
#[derive(Debug)]
pub struct ConfAStar {
    matrix: Arc<EnergyMatrix>,
    rcs: RcSet,
    frontier: BinaryHeap<SearchNode>,
    num_conformations: f64,
}

impl ConfAStar {
    pub fn new(matrix: Arc<EnergyMatrix>, rcs: RcSet) -> Self {
        let num_conformations = if rcs.has_empty_position() {
            0.0
        } else {
            rcs.num_conformations()
        };
        let mut frontier = BinaryHeap::new();
        if num_conformations > 0.0 {
            let assignment = vec![None; rcs.num_positions()];
            let score = NodeScorer::new(&matrix, &rcs).score(&assignment, BoundSide::Lower);
            frontier.push(SearchNode {
                assignment,
                depth: 0,
                score,
            });
        }
        Self {
            matrix,
            rcs,
            frontier,
            num_conformations,
        }
    }

    pub fn num_conformations(&self) -> f64 {
        self.num_conformations
    }

    /// Lower bound on every conformation not yet returned.
    pub fn peek_lower_bound(&self) -> Option<f64> {
        self.frontier.peek().map(|node| node.score)
    }

    pub fn is_exhausted(&self) -> bool {
        self.frontier.is_empty()
    }

    pub fn frontier_size(&self) -> usize {
        self.frontier.len()
    }

    /// Pops one node, either expanding it or returning it as a conformation.
    pub fn step(&mut self) -> Option<SearchStep> {
        let node = self.frontier.pop()?;
        let num_positions = self.rcs.num_positions();
        if node.depth == num_positions {
            return Some(SearchStep::Leaf(ScoredConf {
                assignment: node.assignment.into_iter().flatten().collect(),
                score: node.score,
            }));
        }

        let scorer = NodeScorer::new(&self.matrix, &self.rcs);
        let pos = node.depth;
        for &rc in self.rcs.get(pos) {
            let mut assignment = node.assignment.clone();
            assignment[pos] = Some(rc);
            let score = scorer.score(&assignment, BoundSide::Lower).max(node.score);
            self.frontier.push(SearchNode {
                assignment,
                depth: pos + 1,
                score,
            });
        }
        Some(SearchStep::Expanded {
            depth: node.depth,
            score: node.score,
        })
    }
}

impl Iterator for ConfAStar {
    type Item = ScoredConf;

    fn next(&mut self) -> Option<ScoredConf> {
        loop {
            match self.step()? {
                SearchStep::Leaf(conf) => return Some(conf),
                SearchStep::Expanded { .. } => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::tests::position;
    use crate::core::space::{ConfSpace, Strand};
    use crate::engine::scoring::tests::{all_conformations, random_matrix, random_space};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn enumerates_every_conformation_in_score_order() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let space = random_space(&mut rng, 4, 3);
            let matrix = Arc::new(random_matrix(&mut rng, &space));
            let rcs = space.all_rcs();
            let search = ConfAStar::new(matrix.clone(), rcs.clone());
            assert_eq!(search.num_conformations(), rcs.num_conformations());

            let confs: Vec<ScoredConf> = search.collect();
            assert_eq!(confs.len(), all_conformations(&rcs).len());
            for pair in confs.windows(2) {
                assert!(pair[0].score <= pair[1].score);
            }
            for conf in &confs {
                let exact = matrix.conformation_energy(&conf.assignment);
                assert!((conf.score - exact).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn popped_scores_never_decrease() {
        let mut rng = StdRng::seed_from_u64(5);
        let space = random_space(&mut rng, 5, 3);
        let matrix = Arc::new(random_matrix(&mut rng, &space));
        let mut search = ConfAStar::new(matrix, space.all_rcs());
        let mut last = f64::NEG_INFINITY;
        while let Some(step) = search.step() {
            let score = match step {
                SearchStep::Expanded { score, .. } => score,
                SearchStep::Leaf(conf) => conf.score,
            };
            assert!(score >= last);
            last = score;
        }
        assert!(search.is_exhausted());
        assert_eq!(search.peek_lower_bound(), None);
    }

    #[test]
    fn first_conformation_is_global_minimum() {
        let mut rng = StdRng::seed_from_u64(99);
        let space = random_space(&mut rng, 5, 4);
        let matrix = Arc::new(random_matrix(&mut rng, &space));
        let rcs = space.all_rcs();
        let best = all_conformations(&rcs)
            .iter()
            .map(|c| matrix.conformation_energy(c))
            .fold(f64::INFINITY, f64::min);
        let first = ConfAStar::new(matrix, rcs).next().unwrap();
        assert!((first.score - best).abs() < 1e-9);
    }

    #[test]
    fn ties_prefer_lexicographically_smaller_assignment() {
        let space = ConfSpace::new(
            "flat",
            vec![
                position("A", Strand::Protein, &[("ALA", "a0"), ("ALA", "a1")]),
                position("B", Strand::Protein, &[("ALA", "b0"), ("ALA", "b1")]),
            ],
        )
        .unwrap();
        let matrix = Arc::new(crate::core::matrix::tests::filled_matrix(
            &space,
            EnergyModel::Minimized,
            |_, _| 0.0,
            |_, _, _, _| 0.0,
        ));
        let order: Vec<Vec<usize>> = ConfAStar::new(matrix, space.all_rcs())
            .map(|c| c.assignment)
            .collect();
        assert_eq!(order, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn restricted_rcs_limit_the_stream() {
        let mut rng = StdRng::seed_from_u64(1);
        let space = random_space(&mut rng, 3, 3);
        let matrix = Arc::new(random_matrix(&mut rng, &space));
        let restricted = RcSet::new(
            (0..space.num_positions()).map(|_| vec![0]).collect(),
        );
        let confs: Vec<_> = ConfAStar::new(matrix, restricted).collect();
        assert_eq!(confs.len(), 1);
        assert!(confs[0].assignment.iter().all(|&r| r == 0));
    }

    #[test]
    fn empty_space_yields_one_empty_conformation() {
        let space = ConfSpace::new("empty", Vec::new()).unwrap();
        let matrix = Arc::new(crate::core::matrix::tests::filled_matrix(
            &space,
            EnergyModel::Minimized,
            |_, _| 0.0,
            |_, _, _, _| 0.0,
        ));
        let confs: Vec<_> = ConfAStar::new(matrix, space.all_rcs()).collect();
        assert_eq!(confs, vec![ScoredConf { assignment: vec![], score: 0.0 }]);
    }

    #[test]
    fn position_without_rcs_yields_nothing() {
        let space = ConfSpace::new(
            "one",
            vec![position("A", Strand::Protein, &[("ALA", "a0")])],
        )
        .unwrap();
        let matrix = Arc::new(crate::core::matrix::tests::filled_matrix(
            &space,
            EnergyModel::Minimized,
            |_, _| 1.0,
            |_, _, _, _| 0.0,
        ));
        let mut search = ConfAStar::new(matrix, RcSet::new(vec![Vec::new()]));
        assert_eq!(search.num_conformations(), 0.0);
        assert!(search.next().is_none());
    }
}
